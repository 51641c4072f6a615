// THEORY:
// The `BBoxTable` is the summary of a connected-component label image. Labelling
// gives every pixel a component index; the table turns that into parallel columns
// indexed by component: bounding box, status, pixel count, a per-frame count for
// tracking, an auxiliary scalar and a velocity.
//
// Key architectural principles:
// 1.  **Index 0 is background**: it is never bounded and never valid. Real
//     components live at 1..N-1.
// 2.  **Filters only touch status**: `area_thresh`, `aspect_thresh`, `pixel_thresh`,
//     `rem_border`, `poison_over` and `retain_over` demote components by rewriting the
//     status column. Boxes and counts stay as measured, so filters can be chained in
//     any order and re-queried afterwards.
// 3.  **Tight boxes**: after `find_bbox`, each box covers exactly the in-window pixels
//     carrying its label.

use crate::core_modules::image::Image;
use crate::core_modules::roi::Roi;
use crate::error::{Error, Result};

/// Largest window whose 8-bit squared sum is guaranteed to fit a 32-bit accumulator.
pub const MAX_STAT_AREA: i64 = 66051;

/// Lifecycle of an entry in a box table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum BoxStatus {
    /// Slot never seen.
    Never = -2,
    /// Was present, disappeared this frame.
    Dead = -1,
    /// Measured but filtered out.
    #[default]
    Invalid = 0,
    /// Measured and passing all filters so far.
    Pending = 1,
    /// Became valid this frame.
    JustValid = 2,
    /// Valid for several frames.
    Stable = 3,
}

impl BoxStatus {
    pub fn is_valid(self) -> bool {
        self > BoxStatus::Invalid
    }
}

/// Parallel per-component columns. Entry 0 is unused.
#[derive(Debug, Clone, Default)]
pub struct BBoxTable {
    boxes: Vec<Roi>,
    status: Vec<BoxStatus>,
    count: Vec<i64>,
    /// Per-frame count used by trackers.
    pub frames: Vec<i32>,
    /// Auxiliary scalar slot, owner-defined.
    pub aux: Vec<f64>,
    /// Velocity (vx, vy, vz) per entry.
    pub vel: Vec<[f64; 3]>,
    valid: usize,
}

impl BBoxTable {
    pub fn new(n: usize) -> Self {
        let mut t = Self::default();
        t.set_size(n);
        t
    }

    /// Resize the table. Entries keep their values when the size is unchanged.
    pub fn set_size(&mut self, n: usize) {
        let n = n.max(1);
        self.boxes.resize(n, Roi::default());
        self.status.resize(n, BoxStatus::Never);
        self.count.resize(n, 0);
        self.frames.resize(n, 0);
        self.aux.resize(n, 0.0);
        self.vel.resize(n, [0.0; 3]);
        self.valid = n;
    }

    /// Number of entries in use (including the unused entry 0).
    pub fn size(&self) -> usize {
        self.valid
    }

    pub fn bbox(&self, i: usize) -> Roi {
        self.boxes.get(i).copied().unwrap_or_default()
    }

    pub fn status(&self, i: usize) -> BoxStatus {
        self.status.get(i).copied().unwrap_or(BoxStatus::Never)
    }

    pub fn set_status(&mut self, i: usize, s: BoxStatus) {
        if i > 0 && i < self.valid {
            self.status[i] = s;
        }
    }

    pub fn pixels(&self, i: usize) -> i64 {
        self.count.get(i).copied().unwrap_or(0)
    }

    pub fn is_valid(&self, i: usize) -> bool {
        i > 0 && i < self.valid && self.status[i].is_valid()
    }

    /// Indices of all currently valid entries.
    pub fn valid_ids(&self) -> impl Iterator<Item = usize> + '_ {
        (1..self.valid).filter(|&i| self.status[i].is_valid())
    }

    pub fn count_valid(&self) -> usize {
        self.valid_ids().count()
    }

    /// Measure boxes and pixel counts from a 16-bit label image with `n` labels
    /// (label values 1..n-1). Entries with pixels become `Pending`, others `Invalid`.
    pub fn find_bbox(&mut self, labels: &Image, n: usize) -> Result<usize> {
        labels.check_fields(2)?;
        self.set_size(n);
        for i in 0..self.valid {
            self.boxes[i] = Roi::default();
            self.count[i] = 0;
        }
        let r = labels.roi();
        for y in r.y..r.y1() {
            for x in r.x..r.x1() {
                let lab = labels.get16(x as usize, y as usize) as usize;
                if lab == 0 || lab >= self.valid {
                    continue;
                }
                self.boxes[lab].absorb_point(x, y);
                self.count[lab] += 1;
            }
        }
        self.status[0] = BoxStatus::Invalid;
        for i in 1..self.valid {
            self.status[i] = if self.count[i] > 0 { BoxStatus::Pending } else { BoxStatus::Invalid };
        }
        Ok(self.count_valid())
    }

    /// Invalidate entries whose pixel count is outside [lo, hi] (hi <= 0 means no limit).
    pub fn area_thresh(&mut self, lo: i64, hi: i64) -> usize {
        self.demote(|t, i| t.count[i] < lo || (hi > 0 && t.count[i] > hi))
    }

    /// Invalidate entries whose box aspect (height / width) is outside [lo, hi].
    pub fn aspect_thresh(&mut self, lo: f64, hi: f64) -> usize {
        self.demote(|t, i| {
            let b = t.boxes[i];
            if b.w <= 0 {
                return true;
            }
            let asp = b.h as f64 / b.w as f64;
            asp < lo || asp > hi
        })
    }

    /// Invalidate entries whose fill ratio (pixels / box area) is below `frac`.
    pub fn pixel_thresh(&mut self, frac: f64) -> usize {
        self.demote(|t, i| {
            let a = t.boxes[i].area();
            a <= 0 || (t.count[i] as f64) < frac * a as f64
        })
    }

    /// Invalidate entries whose box comes within `margin` pixels of the image edge.
    pub fn rem_border(&mut self, width: usize, height: usize, margin: i32) -> usize {
        let (w, h) = (width as i32, height as i32);
        self.demote(|t, i| {
            let b = t.boxes[i];
            b.x < margin || b.y < margin || b.x1() > w - margin || b.y1() > h - margin
        })
    }

    /// Invalidate every entry that has any pixel where `mark` exceeds `th`.
    pub fn poison_over(&mut self, labels: &Image, mark: &Image, th: u8) -> Result<usize> {
        let hit = self.touching(labels, mark, th)?;
        Ok(self.demote(|_, i| hit[i]))
    }

    /// Keep only entries that have some pixel where `mark` exceeds `th`.
    pub fn retain_over(&mut self, labels: &Image, mark: &Image, th: u8) -> Result<usize> {
        let hit = self.touching(labels, mark, th)?;
        Ok(self.demote(|_, i| !hit[i]))
    }

    fn touching(&self, labels: &Image, mark: &Image, th: u8) -> Result<Vec<bool>> {
        labels.check_fields(2)?;
        mark.check_fields(1)?;
        if !labels.same_size(mark) {
            return Err(Error::SizeMismatch { expected: labels.describe(), actual: mark.describe() });
        }
        let mut hit = vec![false; self.valid];
        let r = labels.joint_roi(&[mark]);
        for y in r.y as usize..r.y1() as usize {
            for x in r.x as usize..r.x1() as usize {
                let lab = labels.get16(x, y) as usize;
                if lab > 0 && lab < self.valid && mark.get(x, y) > th {
                    hit[lab] = true;
                }
            }
        }
        Ok(hit)
    }

    /// Apply a rejection predicate to the valid entries. Returns the number still valid.
    fn demote<F: Fn(&Self, usize) -> bool>(&mut self, reject: F) -> usize {
        let mut kept = 0;
        for i in 1..self.valid {
            if !self.status[i].is_valid() {
                continue;
            }
            if reject(self, i) {
                self.status[i] = BoxStatus::Invalid;
            } else {
                kept += 1;
            }
        }
        kept
    }

    /// Render the valid components of `labels` into `dest` with value `val`
    /// (other in-window pixels are zeroed).
    pub fn mark_valid(&self, dest: &mut Image, labels: &Image, val: u8) -> Result<()> {
        dest.check_fields(1)?;
        labels.check_fields(2)?;
        let r = dest.joint_roi(&[labels]);
        for y in r.y as usize..r.y1() as usize {
            for x in r.x as usize..r.x1() as usize {
                let lab = labels.get16(x, y) as usize;
                dest.set(x, y, if self.is_valid(lab) { val } else { 0 });
            }
        }
        Ok(())
    }

    /// Largest valid entry by pixel count.
    pub fn biggest(&self) -> Option<usize> {
        self.valid_ids().max_by_key(|&i| self.count[i])
    }
}

/// Sum and squared sum of the 8-bit pixels in a window, using 32-bit accumulators.
/// Windows larger than `MAX_STAT_AREA` are rejected since the squared sum could overflow.
pub fn region_stats(img: &Image, area: &Roi) -> Result<(u32, u32)> {
    img.check_fields(1)?;
    let r = img.roi().overlap(area);
    if r.area() > MAX_STAT_AREA {
        log::error!("region_stats: window {}x{} exceeds {} pixels", r.w, r.h, MAX_STAT_AREA);
        return Err(Error::InvalidInput(format!("statistics window too large: {} pixels", r.area())));
    }
    let (mut s, mut s2) = (0u32, 0u32);
    for y in r.y as usize..r.y1() as usize {
        for x in r.x as usize..r.x1() as usize {
            let v = img.get(x, y) as u32;
            s += v;
            s2 += v * v;
        }
    }
    Ok((s, s2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::toolkit;

    fn two_blobs() -> (Image, usize) {
        let mut mask = Image::new(40, 20, 1);
        mask.fill_roi(&Roi::new(2, 3, 5, 4), 255);
        mask.fill_roi(&Roi::new(20, 5, 12, 10), 255);
        let mut labels = Image::new(40, 20, 2);
        let n = toolkit::label_components(&mut labels, &mask, 0).unwrap();
        (labels, n)
    }

    #[test]
    fn boxes_are_tight() {
        let (labels, n) = two_blobs();
        let mut t = BBoxTable::default();
        assert_eq!(t.find_bbox(&labels, n).unwrap(), 2);
        assert_eq!(t.bbox(1), Roi::new(2, 3, 5, 4));
        assert_eq!(t.bbox(2), Roi::new(20, 5, 12, 10));
        assert_eq!(t.pixels(2), 120);
        assert!(!t.is_valid(0));
    }

    #[test]
    fn filters_only_change_status() {
        let (labels, n) = two_blobs();
        let mut t = BBoxTable::default();
        t.find_bbox(&labels, n).unwrap();
        assert_eq!(t.area_thresh(50, 0), 1);
        assert_eq!(t.status(1), BoxStatus::Invalid);
        assert_eq!(t.bbox(1), Roi::new(2, 3, 5, 4));
        assert_eq!(t.biggest(), Some(2));
        assert_eq!(t.rem_border(40, 20, 6), 0);
    }

    #[test]
    fn poison_and_retain() {
        let (labels, n) = two_blobs();
        let mut mark = Image::new(40, 20, 1);
        mark.set(4, 4, 200);
        let mut t = BBoxTable::default();
        t.find_bbox(&labels, n).unwrap();
        assert_eq!(t.retain_over(&labels, &mark, 100).unwrap(), 1);
        assert!(t.is_valid(1));
        t.find_bbox(&labels, n).unwrap();
        assert_eq!(t.poison_over(&labels, &mark, 100).unwrap(), 1);
        assert!(t.is_valid(2));
    }

    #[test]
    fn region_stats_guard() {
        let mut img = Image::new(300, 300, 1);
        img.fill(2);
        assert_eq!(region_stats(&img, &Roi::new(0, 0, 10, 10)).unwrap(), (200, 400));
        assert!(region_stats(&img, &Roi::new(0, 0, 300, 300)).is_err());
    }
}
