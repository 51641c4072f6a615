// THEORY:
// The `PersonFinder` reads raw people off the fused overhead height map. It has no
// memory: one map in, one list of candidates out. The tracker supplies the memory.
//
// Key steps:
// 1.  **Body mask**: cells taller than `body` inches are people, furniture or walls.
//     They are grouped into 8-connected components and small ones are dropped.
// 2.  **Head**: the highest point of a component must clear `hmin`. The head position
//     is the centroid of the cells within `hband` of that peak, so a single noisy cell
//     does not drag it around.
// 3.  **Hands**: arm cells sit in a height band below the head. The farthest such cell
//     beyond `reach` from the head is one hand; the farthest one on the opposite side of
//     the head is the other. Each hand gets a pointing direction from a virtual
//     shoulder below the head to the hand tip.

use nalgebra::Vector3;

use crate::core_modules::blob::BlobTable;
use crate::core_modules::image::Image;
use crate::core_modules::overhead::Overhead;
use crate::core_modules::toolkit;
use crate::error::Result;
use crate::params::{ParamSet, Tunable};

/// A hand candidate in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawHand {
    /// Tip position (world x, y, height above table).
    pub pos: Vector3<f64>,
    /// Unit direction from the shoulder to the tip.
    pub dir: Vector3<f64>,
}

/// A single-frame person candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPerson {
    /// Head position (world x, y, height above table).
    pub pos: Vector3<f64>,
    /// Up to two hands, left (smaller x) first.
    pub hands: Vec<RawHand>,
    /// Component label in the finder's label image (0 when synthetic).
    pub blob: usize,
    /// Footprint in map cells.
    pub area: usize,
}

impl RawPerson {
    /// Detection without hands or blob, mostly for feeding the tracker directly.
    pub fn at(x: f64, y: f64, z: f64) -> Self {
        Self { pos: Vector3::new(x, y, z), hands: Vec::new(), blob: 0, area: 0 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinderParams {
    pub body: f64,
    pub hmin: f64,
    pub hband: f64,
    pub amin: f64,
    pub arm_lo: f64,
    pub arm_gap: f64,
    pub reach: f64,
    pub sdrop: f64,
}

impl Default for FinderParams {
    fn default() -> Self {
        Self {
            body: 24.0,
            hmin: 40.0,
            hband: 3.0,
            amin: 100.0,
            arm_lo: 30.0,
            arm_gap: 8.0,
            reach: 12.0,
            sdrop: 10.0,
        }
    }
}

impl Tunable for FinderParams {
    fn params(&self) -> ParamSet {
        let d = Self::default();
        ParamSet::new("find")
            .float("body", self.body, d.body, "Min body height (in)")
            .float("hmin", self.hmin, d.hmin, "Min head height (in)")
            .float("hband", self.hband, d.hband, "Head cap thickness (in)")
            .float("amin", self.amin, d.amin, "Min footprint (sq in)")
            .float("arm_lo", self.arm_lo, d.arm_lo, "Lowest arm height (in)")
            .float("arm_gap", self.arm_gap, d.arm_gap, "Arm band top below head (in)")
            .float("reach", self.reach, d.reach, "Min hand distance from head (in)")
            .float("sdrop", self.sdrop, d.sdrop, "Shoulder drop below head (in)")
    }

    fn set_params(&mut self, ps: &ParamSet) {
        self.body = ps.f64_or("body", self.body);
        self.hmin = ps.f64_or("hmin", self.hmin);
        self.hband = ps.f64_or("hband", self.hband);
        self.amin = ps.f64_or("amin", self.amin);
        self.arm_lo = ps.f64_or("arm_lo", self.arm_lo);
        self.arm_gap = ps.f64_or("arm_gap", self.arm_gap);
        self.reach = ps.f64_or("reach", self.reach);
        self.sdrop = ps.f64_or("sdrop", self.sdrop);
    }
}

/// Raw person detector over an overhead map.
#[derive(Debug, Clone, Default)]
pub struct PersonFinder {
    pub ps: FinderParams,
    mask: Image,
    labels: Image,
    blobs: BlobTable,
}

impl PersonFinder {
    pub fn new(ps: FinderParams) -> Self {
        Self { ps, ..Self::default() }
    }

    /// Component labels of the most recent `find` (16 bit).
    pub fn labels(&self) -> &Image {
        &self.labels
    }

    /// Component label under a world location in the most recent `find`.
    pub fn blob_under(&self, oh: &Overhead, wx: f64, wy: f64) -> usize {
        match oh.geometry().cell(wx, wy) {
            Some((i, j)) if self.labels.is_valid() && i < self.labels.width() && j < self.labels.height() => {
                self.labels.get16(i, j) as usize
            }
            _ => 0,
        }
    }

    /// Whether a component that passed the footprint filter in the most recent `find`
    /// lies within `radius` of a world location.
    pub fn body_near(&self, oh: &Overhead, wx: f64, wy: f64, radius: f64) -> bool {
        let ipp = oh.geometry().ipp;
        let k = (radius / ipp).floor() as i32;
        for dj in -k..=k {
            for di in -k..=k {
                let (dx, dy) = (di as f64 * ipp, dj as f64 * ipp);
                if dx * dx + dy * dy > radius * radius {
                    continue;
                }
                let lab = self.blob_under(oh, wx + dx, wy + dy);
                if lab > 0 && self.blobs.is_valid(lab) {
                    return true;
                }
            }
        }
        false
    }

    /// Detect people on the current map of `oh`.
    pub fn find(&mut self, oh: &Overhead) -> Result<Vec<RawPerson>> {
        let map = oh.map();
        let geom = oh.geometry();
        self.mask.set_size_like(map);
        toolkit::threshold(&mut self.mask, map, oh.encode(self.ps.body))?;
        let n = toolkit::label_components(&mut self.labels, &self.mask, 0)?;
        self.blobs.find_params(&self.labels, n)?;
        let cells = (self.ps.amin / (geom.ipp * geom.ipp)).round() as i64;
        self.blobs.area_thresh(cells, 0);
        self.blobs.max_each(&self.labels, map)?;

        let head_min = oh.encode(self.ps.hmin);
        let ids: Vec<usize> = self.blobs.valid_ids().collect();
        let mut out = Vec::new();
        for i in ids {
            let peak = self.blobs.value[i] as u8;
            if peak < head_min {
                continue;
            }
            if let Some(p) = self.person_from(oh, i, peak) {
                out.push(p);
            }
        }
        log::debug!("person_finder: {} components, {} people", n.saturating_sub(1), out.len());
        Ok(out)
    }

    fn person_from(&self, oh: &Overhead, lab: usize, peak: u8) -> Option<RawPerson> {
        let map = oh.map();
        let geom = oh.geometry();
        let bb = self.blobs.bbox(lab);
        let top = oh.decode(peak);
        let cap = oh.encode(top - self.ps.hband);

        // head: centroid of the cap cells
        let (mut sx, mut sy, mut n) = (0.0, 0.0, 0.0);
        for j in bb.y..bb.y1() {
            for i in bb.x..bb.x1() {
                let (ui, uj) = (i as usize, j as usize);
                if self.labels.get16(ui, uj) as usize == lab && map.get(ui, uj) >= cap {
                    sx += i as f64;
                    sy += j as f64;
                    n += 1.0;
                }
            }
        }
        if n == 0.0 {
            return None;
        }
        let (hx, hy) = geom.to_world(sx / n, sy / n);
        let head = Vector3::new(hx, hy, top);

        // hands: farthest arm cells on either side of the head
        let lo = oh.encode(self.ps.arm_lo);
        let hi = oh.encode(top - self.ps.arm_gap);
        let reach2 = self.ps.reach * self.ps.reach;
        let mut cands: Vec<(f64, Vector3<f64>)> = Vec::new();
        for j in bb.y..bb.y1() {
            for i in bb.x..bb.x1() {
                let (ui, uj) = (i as usize, j as usize);
                let v = map.get(ui, uj);
                if self.labels.get16(ui, uj) as usize != lab || v < lo || v > hi {
                    continue;
                }
                let (wx, wy) = geom.to_world(i as f64, j as f64);
                let d2 = (wx - hx).powi(2) + (wy - hy).powi(2);
                if d2 >= reach2 {
                    cands.push((d2, Vector3::new(wx, wy, oh.decode(v))));
                }
            }
        }
        let mut hands = Vec::new();
        if let Some(&(_, first)) = cands.iter().max_by(|a, b| a.0.total_cmp(&b.0)) {
            let d1 = Vector3::new(first.x - hx, first.y - hy, 0.0);
            hands.push(first);
            let second = cands
                .iter()
                .filter(|(_, p)| (p.x - hx) * d1.x + (p.y - hy) * d1.y < 0.0)
                .max_by(|a, b| a.0.total_cmp(&b.0));
            if let Some(&(_, p)) = second {
                hands.push(p);
            }
        }
        hands.sort_by(|a, b| a.x.total_cmp(&b.x));
        let shoulder = Vector3::new(hx, hy, top - self.ps.sdrop);
        let hands = hands
            .into_iter()
            .filter_map(|tip| {
                let d = tip - shoulder;
                let len = d.norm();
                (len > 1e-6).then(|| RawHand { pos: tip, dir: d / len })
            })
            .collect();
        Some(RawPerson { pos: head, hands, blob: lab, area: self.blobs.pixels(lab) as usize })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core_modules::camera::MapGeometry;
    use crate::core_modules::overhead::OverheadParams;
    use crate::core_modules::roi::Roi;

    /// Overhead with a 1 inch grid spanning x in [-50, 50], y in [0, 100].
    pub(crate) fn small_overhead() -> Overhead {
        let ps = OverheadParams {
            geom: MapGeometry { mw: 100.0, mh: 100.0, ipp: 1.0, x0: 0.0, y0: 50.0 },
            ..OverheadParams::default()
        };
        Overhead::new(ps)
    }

    /// Paint a standing person: shoulders 14 x 10 at 52 in, head 6 x 6 at 64 in,
    /// optional right arm reaching 20 in sideways at 44 in.
    pub(crate) fn paint_person(oh: &Overhead, map: &mut Image, cx: i32, cy: i32, arm: bool) {
        map.fill_roi(&Roi::new(cx - 7, cy - 5, 14, 10), oh.encode(52.0));
        map.fill_roi(&Roi::new(cx - 3, cy - 3, 6, 6), oh.encode(64.0));
        if arm {
            map.fill_roi(&Roi::new(cx + 7, cy - 1, 16, 2), oh.encode(44.0));
        }
    }

    #[test]
    fn finds_head_and_hand() {
        let mut oh = small_overhead();
        let mut map = Image::new(100, 100, 1);
        paint_person(&oh, &mut map, 30, 60, true);
        oh.load_map(&map).unwrap();
        let mut f = PersonFinder::default();
        let people = f.find(&oh).unwrap();
        assert_eq!(people.len(), 1);
        let p = &people[0];
        let (hx, hy) = oh.geometry().to_world(29.5, 59.5);
        assert!((p.pos.x - hx).abs() < 0.6 && (p.pos.y - hy).abs() < 0.6);
        assert!((p.pos.z - 64.0).abs() < 0.5);
        assert_eq!(p.hands.len(), 1);
        assert!(p.hands[0].pos.x > p.pos.x + 12.0);
        assert!(p.hands[0].dir.x > 0.8);
    }

    #[test]
    fn short_objects_are_not_people() {
        let mut oh = small_overhead();
        let mut map = Image::new(100, 100, 1);
        map.fill_roi(&Roi::new(10, 10, 20, 20), oh.encode(30.0));
        oh.load_map(&map).unwrap();
        let mut f = PersonFinder::default();
        assert!(f.find(&oh).unwrap().is_empty());
    }
}
