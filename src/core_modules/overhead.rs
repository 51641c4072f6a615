// THEORY:
// The `Overhead` projector turns depth frames from several calibrated sensors into one
// top-down height raster. Each depth pixel becomes a camera-frame point, then a world
// point, then a map cell whose byte encodes the point's height above the reference
// table plane. Sensors are merged by keeping the highest point seen in each cell.
//
// Key architectural principles:
// 1.  **Cycles**: `reset` opens a frame cycle. The first `ingest` of the cycle wipes the
//     map ("rasa"); every later ingest merges by max. `reproject` is the per-sensor
//     variant that fills its own output and never touches the shared map.
// 2.  **Byte heights**: heights in [zlo, zhi] above the table map linearly to [1, 252];
//     0 is reserved for "nothing seen here".
// 3.  **Gap filling**: oblique views leave sampling holes far from the sensor. A hole is
//     filled from the highest neighbour of a small box only when enough of the box was
//     observed, so real object edges do not grow.
// 4.  **Self calibration**: the embedded `PlaneFitter` can re-estimate a camera's tilt,
//     roll and height from its own depth image, but a result is adopted only when it is
//     well supported and close to the current calibration.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core_modules::camera::{CameraRecord, MapGeometry, Optics};
use crate::core_modules::image::Image;
use crate::core_modules::plane_fit::{PlaneFitter, PlanePose, PlaneStats, ScanDir};
use crate::core_modules::roi::Roi;
use crate::core_modules::toolkit;
use crate::error::{Error, Result};
use crate::params::{ParamSet, Tunable};

/// Maximum number of sensors in a rig.
pub const MAX_CAMS: usize = 12;
/// Valid raw depth range (4 × mm).
pub const DEPTH_LO: u16 = 1760;
pub const DEPTH_HI: u16 = 40000;
/// Deviation renderer output for the plane itself and for the extremes.
pub const DEV_ZERO: u8 = 128;
pub const DEV_BELOW: u8 = 28;
pub const DEV_ABOVE: u8 = 228;

#[derive(Debug, Clone, PartialEq)]
pub struct OverheadParams {
    pub geom: MapGeometry,
    /// Height range (above the table plane) encoded by the map.
    pub zlo: f64,
    pub zhi: f64,
    /// Reference table plane height in world z.
    pub ztab: f64,
    /// Hard ceiling on projected points.
    pub zcut: f64,
    /// Keep high resolution colour frames at full size in `correct`.
    pub big: bool,
    /// Pose estimation acceptance: min points, max stdev, max changes.
    pub npts: usize,
    pub rough: f64,
    pub dtilt: f64,
    pub droll: f64,
    pub dht: f64,
    /// Deviation that saturates the plane-deviation renderer.
    pub dmax: f64,
}

impl Default for OverheadParams {
    fn default() -> Self {
        Self {
            geom: MapGeometry::default(),
            zlo: 0.0,
            zhi: 84.0,
            ztab: 0.0,
            zcut: 96.0,
            big: false,
            npts: 200,
            rough: 1.0,
            dtilt: 10.0,
            droll: 5.0,
            dht: 6.0,
            dmax: 4.0,
        }
    }
}

impl Tunable for OverheadParams {
    fn params(&self) -> ParamSet {
        let d = Self::default();
        ParamSet::new("map")
            .float("mw", self.geom.mw, d.geom.mw, "Map width (in)")
            .float("mh", self.geom.mh, d.geom.mh, "Map depth (in)")
            .float("ipp", self.geom.ipp, d.geom.ipp, "Inches per map pixel")
            .float("x0", self.geom.x0, d.geom.x0, "Map center x (in)")
            .float("y0", self.geom.y0, d.geom.y0, "Map center y (in)")
            .float("zlo", self.zlo, d.zlo, "Lowest encoded height (in)")
            .float("zhi", self.zhi, d.zhi, "Highest encoded height (in)")
            .float("ztab", self.ztab, d.ztab, "Reference plane height (in)")
            .float("zcut", self.zcut, d.zcut, "Ceiling for projection (in)")
            .int("big", self.big as i64, d.big as i64, "Keep big colour frames")
            .int("npts", self.npts as i64, d.npts as i64, "Min points for pose")
            .float("rough", self.rough, d.rough, "Max plane stdev for pose (in)")
            .float("dtilt", self.dtilt, d.dtilt, "Max tilt change (deg)")
            .float("droll", self.droll, d.droll, "Max roll change (deg)")
            .float("dht", self.dht, d.dht, "Max height change (in)")
            .float("dmax", self.dmax, d.dmax, "Saturating plane deviation (in)")
    }

    fn set_params(&mut self, ps: &ParamSet) {
        self.geom.mw = ps.f64_or("mw", self.geom.mw);
        self.geom.mh = ps.f64_or("mh", self.geom.mh);
        self.geom.ipp = ps.f64_or("ipp", self.geom.ipp).max(0.01);
        self.geom.x0 = ps.f64_or("x0", self.geom.x0);
        self.geom.y0 = ps.f64_or("y0", self.geom.y0);
        self.zlo = ps.f64_or("zlo", self.zlo);
        self.zhi = ps.f64_or("zhi", self.zhi);
        self.ztab = ps.f64_or("ztab", self.ztab);
        self.zcut = ps.f64_or("zcut", self.zcut);
        self.big = ps.i64_or("big", self.big as i64) != 0;
        self.npts = ps.usize_or("npts", self.npts);
        self.rough = ps.f64_or("rough", self.rough);
        self.dtilt = ps.f64_or("dtilt", self.dtilt);
        self.droll = ps.f64_or("droll", self.droll);
        self.dht = ps.f64_or("dht", self.dht);
        self.dmax = ps.f64_or("dmax", self.dmax);
    }
}

/// On-disk form of a rig.
#[derive(Debug, Serialize, Deserialize)]
struct RigFile {
    geom: MapGeometry,
    cams: Vec<CameraRecord>,
}

/// Multi-sensor overhead height map builder.
#[derive(Debug, Clone)]
pub struct Overhead {
    pub ps: OverheadParams,
    optics: Optics,
    cams: Vec<CameraRecord>,
    map: Image,
    rasa: bool,
    fitter: PlaneFitter,
    plane: (f64, f64, f64),
    mask: Image,
    tmp: Image,
}

impl Default for Overhead {
    fn default() -> Self {
        Self::new(OverheadParams::default())
    }
}

impl Overhead {
    pub fn new(ps: OverheadParams) -> Self {
        let map = Image::new(ps.geom.width(), ps.geom.height(), 1);
        Self {
            ps,
            optics: Optics::default(),
            cams: vec![CameraRecord::default(); MAX_CAMS],
            map,
            rasa: true,
            fitter: PlaneFitter::new(),
            plane: (0.0, 0.0, 0.0),
            mask: Image::default(),
            tmp: Image::default(),
        }
    }

    /// Configure the shared depth intrinsics.
    pub fn src_size(&mut self, width: usize, height: usize, focal: f64, scale: f64) {
        self.optics = Optics::from_source(width, height, focal, scale);
        self.fitter.set_optics(self.optics.focal, self.optics.scale);
    }

    pub fn optics(&self) -> Optics {
        self.optics
    }

    pub fn cam(&self, n: usize) -> Result<&CameraRecord> {
        self.cams.get(n).ok_or(Error::CameraIndex(n))
    }

    pub fn set_cam(&mut self, n: usize, rec: CameraRecord) -> Result<()> {
        let slot = self.cams.get_mut(n).ok_or_else(|| {
            log::error!("set_cam: camera {} out of range", n);
            Error::CameraIndex(n)
        })?;
        *slot = rec;
        Ok(())
    }

    /// Cameras with a device attached.
    pub fn active(&self) -> impl Iterator<Item = (usize, &CameraRecord)> {
        self.cams.iter().enumerate().filter(|(_, c)| c.is_present())
    }

    /// Read a rig (map geometry and camera records) from JSON. Nothing changes on failure.
    pub fn load_cfg(&mut self, path: &Path) -> Result<usize> {
        let text = fs::read_to_string(path)?;
        let rig: RigFile = serde_json::from_str(&text)?;
        if rig.cams.len() > MAX_CAMS {
            return Err(Error::Format(format!("{} cameras, at most {}", rig.cams.len(), MAX_CAMS)));
        }
        let n = rig.cams.len();
        self.ps.geom = rig.geom;
        self.cams = rig.cams;
        self.cams.resize(MAX_CAMS, CameraRecord::default());
        self.map.set_size(self.ps.geom.width(), self.ps.geom.height(), 1);
        self.rasa = true;
        log::info!("loaded rig with {} camera slots from {}", n, path.display());
        Ok(n)
    }

    /// Write the rig as JSON (trailing empty slots are dropped).
    pub fn save_cfg(&self, path: &Path) -> Result<()> {
        let last = self.cams.iter().rposition(|c| c.is_present()).map_or(0, |i| i + 1);
        let rig = RigFile { geom: self.ps.geom, cams: self.cams[..last].to_vec() };
        fs::write(path, serde_json::to_string_pretty(&rig)?)?;
        Ok(())
    }

    /// Start a new frame cycle: the next ingest clears the map.
    pub fn reset(&mut self) {
        self.rasa = true;
        for c in &mut self.cams {
            c.used = false;
        }
        let (w, h) = (self.ps.geom.width(), self.ps.geom.height());
        if self.map.width() != w || self.map.height() != h {
            self.map.set_size(w, h, 1);
        }
    }

    pub fn map(&self) -> &Image {
        &self.map
    }

    /// Install an externally built map (same size as the map geometry).
    pub fn load_map(&mut self, src: &Image) -> Result<()> {
        src.check_fields(1)?;
        let (w, h) = (self.ps.geom.width(), self.ps.geom.height());
        if src.width() != w || src.height() != h {
            return Err(Error::SizeMismatch { expected: format!("{}x{}x1", w, h), actual: src.describe() });
        }
        self.map.clone_from_image(src);
        self.map.max_roi();
        self.rasa = false;
        Ok(())
    }

    pub fn geometry(&self) -> MapGeometry {
        self.ps.geom
    }

    /// Map byte for a height above the table (heights outside the range saturate).
    pub fn encode(&self, h: f64) -> u8 {
        let f = (h - self.ps.zlo) / (self.ps.zhi - self.ps.zlo);
        (1.0 + (251.0 * f).round()).clamp(1.0, 252.0) as u8
    }

    /// Height above the table for a non-zero map byte.
    pub fn decode(&self, v: u8) -> f64 {
        self.ps.zlo + (v.max(1) as f64 - 1.0) * (self.ps.zhi - self.ps.zlo) / 251.0
    }

    /// Observed height above the table at a world location.
    pub fn height_at(&self, wx: f64, wy: f64) -> Option<f64> {
        let (i, j) = self.ps.geom.cell(wx, wy)?;
        let v = self.map.get(i, j);
        (v > 0).then(|| self.decode(v))
    }

    /// Project one sensor into the shared map, merging by max height.
    pub fn ingest(&mut self, depth: &Image, bot: f64, top: f64, n: usize) -> Result<usize> {
        if self.rasa {
            self.reset();
            self.map.clear_all();
            self.rasa = false;
        }
        let mut map = std::mem::take(&mut self.map);
        let res = self.project(&mut map, depth, bot, top, n);
        self.map = map;
        if res.is_ok() {
            self.cams[n].used = true;
        }
        res
    }

    /// Project one sensor into its own map image (cleared first).
    pub fn reproject(&self, dest: &mut Image, depth: &Image, bot: f64, top: f64, n: usize) -> Result<usize> {
        dest.set_size(self.ps.geom.width(), self.ps.geom.height(), 1);
        dest.clear_all();
        self.project(dest, depth, bot, top, n)
    }

    fn project(&self, dest: &mut Image, depth: &Image, bot: f64, top: f64, n: usize) -> Result<usize> {
        let cam = self.cam(n)?;
        depth.check_fields(2)?;
        if depth.width() != self.optics.width || depth.height() != self.optics.height {
            log::error!(
                "depth {} does not match source size {}x{}",
                depth.describe(),
                self.optics.width,
                self.optics.height
            );
            return Err(Error::SizeMismatch {
                expected: format!("{}x{}x2", self.optics.width, self.optics.height),
                actual: depth.describe(),
            });
        }
        let rot = cam.rotation();
        let pos = cam.position();
        let zmin = self.ps.ztab + bot;
        let zmax = (self.ps.ztab + top).min(self.ps.zcut);
        let geom = self.ps.geom;
        let (mw, mh) = (dest.width(), dest.height());
        let range2 = cam.range * cam.range;
        let r = depth.roi();
        let mut cnt = 0;
        for v in r.y as usize..r.y1() as usize {
            for u in r.x as usize..r.x1() as usize {
                let d = depth.get16(u, v);
                if !(DEPTH_LO..=DEPTH_HI).contains(&d) {
                    continue;
                }
                let p = self.optics.point(u as f64, v as f64, d);
                if p.norm_squared() > range2 {
                    continue;
                }
                let w = rot * p + pos;
                if w.z < zmin || w.z > zmax {
                    continue;
                }
                let (fi, fj) = geom.to_map(w.x, w.y);
                if fi < 0.0 || fj < 0.0 {
                    continue;
                }
                let (i, j) = (fi as usize, fj as usize);
                if i >= mw || j >= mh {
                    continue;
                }
                let val = self.encode(w.z - self.ps.ztab);
                if val > dest.get(i, j) {
                    dest.set(i, j, val);
                }
                cnt += 1;
            }
        }
        log::trace!("camera {}: {} points projected", n, cnt);
        Ok(cnt)
    }

    /// Fill unobserved cells of the shared map. Returns the number of cells filled.
    pub fn interpolate(&mut self, scale: usize, pmin: usize) -> usize {
        fill_gaps(&mut self.map, &mut self.tmp, scale, pmin)
    }

    /// Least-squares height plane through the observed map cells in `area`, adopted as the
    /// reference for `plane_dev`. Returns (a, b, c) of h = a·wx + b·wy + c.
    pub fn fit_map_plane(&mut self, area: &Roi) -> Option<(f64, f64, f64)> {
        let mut s = PlaneStats::default();
        let r = self.map.roi().overlap(area);
        for j in r.y..r.y1() {
            for i in r.x..r.x1() {
                let v = self.map.get(i as usize, j as usize);
                if v == 0 {
                    continue;
                }
                let (wx, wy) = self.ps.geom.to_world(i as f64, j as f64);
                s.add_point(wx, wy, self.decode(v));
            }
        }
        let abc = s.solve()?;
        self.plane = abc;
        Some(abc)
    }

    pub fn set_plane(&mut self, a: f64, b: f64, c: f64) {
        self.plane = (a, b, c);
    }

    /// Render signed deviation from the reference plane: 128 on the plane, 228 at `dmax`
    /// above, 28 at `dmax` below, 0 where the map is unobserved. Fixed point 16.16 inner
    /// loop using a per-byte table plus an incremental column term.
    pub fn plane_dev(&self, devs: &mut Image, hts: &Image) -> Result<()> {
        hts.check_fields(1)?;
        devs.set_size(hts.width(), hts.height(), 1);
        let (a, b, c) = self.plane;
        let k = 100.0 / self.ps.dmax.max(1e-3);
        let one = 65536.0;
        let dz = (self.ps.zhi - self.ps.zlo) / 251.0;
        let mut lut = [0i64; 256];
        for (p, e) in lut.iter_mut().enumerate().skip(1) {
            let h = self.ps.zlo + (p as f64 - 1.0) * dz;
            *e = (one * (k * (h - c) + DEV_ZERO as f64) + 0.5 * one).round() as i64;
        }
        let g = self.ps.geom;
        let xorg = g.x0 - 0.5 * g.mw + 0.5 * g.ipp;
        let yorg = g.y0 - 0.5 * g.mh + 0.5 * g.ipp;
        let step = (-one * k * a * g.ipp).round() as i64;
        let (lo, hi) = (DEV_BELOW as i64, DEV_ABOVE as i64);
        for j in 0..hts.height() {
            let wy = yorg + j as f64 * g.ipp;
            let mut acc = (-one * k * (a * xorg + b * wy)).round() as i64;
            for i in 0..hts.width() {
                let p = hts.get(i, j);
                let out = if p == 0 { 0 } else { ((lut[p as usize] + acc) >> 16).clamp(lo, hi) as u8 };
                devs.set(i, j, out);
                acc += step;
            }
        }
        Ok(())
    }

    /// Re-estimate a camera's tilt, roll and height from its depth image. The record is
    /// updated only when the fit is accepted.
    pub fn est_pose(&mut self, depth: &Image, n: usize) -> Result<Option<PlanePose>> {
        let cam = self.cam(n)?.clone();
        let q = cam.roll_quadrant();
        let dir = match q {
            1 => ScanDir::Right,
            2 => ScanDir::Down,
            3 => ScanDir::Left,
            _ => ScanDir::Up,
        };
        let use_mask = cam.poly.is_some();
        if use_mask {
            self.mask.set_size(depth.width(), depth.height(), 1);
            for y in 0..depth.height() {
                for x in 0..depth.width() {
                    let inside = cam.in_poly(x as f64, y as f64);
                    self.mask.set(x, y, if inside { 255 } else { 0 });
                }
            }
        }
        let hint = (cam.pos[2] > 0.0).then_some(cam.pos[2] - self.ps.ztab);
        let mask = use_mask.then_some(&self.mask);
        let Some(pose) = self.fitter.fit_3d_masked(depth, mask, dir, hint) else {
            log::warn!("est_pose: camera {} no floor found", n);
            return Ok(None);
        };
        let qroll = match q {
            3 => -90.0,
            k => 90.0 * k as f64,
        };
        let roll = qroll + pose.roll;
        let height = pose.height + self.ps.ztab;
        let ok = pose.npts >= self.ps.npts
            && pose.stdev <= self.ps.rough
            && (pose.tilt - cam.tilt).abs() <= self.ps.dtilt
            && (roll - cam.roll).abs() <= self.ps.droll
            && (height - cam.pos[2]).abs() <= self.ps.dht;
        if !ok {
            log::warn!(
                "est_pose: camera {} rejected tilt {:.1} roll {:.1} ht {:.1} sd {:.2} n {}",
                n, pose.tilt, roll, height, pose.stdev, pose.npts
            );
            return Ok(None);
        }
        let rec = &mut self.cams[n];
        rec.tilt = pose.tilt;
        rec.roll = roll;
        rec.pos[2] = height;
        log::info!("camera {} pose: tilt {:.2} roll {:.2} height {:.2}", n, pose.tilt, roll, height);
        Ok(Some(pose))
    }

    /// Bring a camera's colour frame upright: quarter-turn rolls are undone by rotation
    /// and tall frames are halved first unless `big` is set.
    pub fn correct(&self, dest: &mut Image, src: &Image, n: usize) -> Result<()> {
        let cam = self.cam(n)?;
        let mut half = Image::default();
        let base = if src.height() > 500 && !self.ps.big {
            toolkit::sample_down(&mut half, src, 2)?;
            &half
        } else {
            src
        };
        let quarters = (4 - cam.roll_quadrant()) % 4;
        if quarters == 0 {
            dest.clone_from_image(base);
            dest.max_roi();
            return Ok(());
        }
        toolkit::rotate_quarter(dest, base, quarters)
    }
}

/// Fill zero cells from the highest value in a `scale` × `scale` box around them when at
/// least `pmin` cells of the box are observed. Decisions use the unfilled values only.
pub fn fill_gaps(map: &mut Image, scratch: &mut Image, scale: usize, pmin: usize) -> usize {
    if map.fields() != 1 || !map.is_valid() {
        return 0;
    }
    scratch.clone_from_image(map);
    let lo = (scale as i32 - 1) / 2;
    let hi = scale as i32 / 2;
    let r = map.roi();
    let mut filled = 0;
    for y in r.y..r.y1() {
        for x in r.x..r.x1() {
            if scratch.get(x as usize, y as usize) != 0 {
                continue;
            }
            let (mut cnt, mut top) = (0, 0u8);
            for dy in -lo..=hi {
                for dx in -lo..=hi {
                    let v = scratch.get_clip(x + dx, y + dy, 0);
                    if v > 0 {
                        cnt += 1;
                        top = top.max(v);
                    }
                }
            }
            if cnt >= pmin {
                map.set(x as usize, y as usize, top);
                filled += 1;
            }
        }
    }
    filled
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overhead() -> Overhead {
        let ps = OverheadParams {
            geom: MapGeometry { mw: 100.0, mh: 100.0, ipp: 1.0, x0: 0.0, y0: 0.0 },
            ..OverheadParams::default()
        };
        let mut oh = Overhead::new(ps);
        oh.src_size(640, 480, 525.0, 1.0 / 101.6);
        oh
    }

    #[test]
    fn encode_decode_ends() {
        let oh = overhead();
        assert_eq!(oh.encode(0.0), 1);
        assert_eq!(oh.encode(84.0), 252);
        assert_eq!(oh.encode(500.0), 252);
        assert!((oh.decode(oh.encode(42.0)) - 42.0).abs() < 0.2);
    }

    #[test]
    fn bad_camera_index() {
        let mut oh = overhead();
        assert!(oh.set_cam(MAX_CAMS, CameraRecord::default()).is_err());
        let depth = Image::new(640, 480, 2);
        assert!(oh.ingest(&depth, -2.0, 90.0, 40).is_err());
    }

    #[test]
    fn first_ingest_clears_then_merges() {
        let mut oh = overhead();
        oh.set_cam(0, CameraRecord::new(0, [0.0, 0.0, 100.0], 0.0, -90.0, 0.0)).unwrap();
        let mut depth = Image::new(640, 480, 2);
        depth.fill16(10160);
        assert!(oh.ingest(&depth, -2.0, 90.0, 0).unwrap() > 0);
        let floor = oh.map().count_over(0);
        assert!(floor > 0);
        // new cycle with nothing seen wipes the old data
        oh.reset();
        let blank = Image::new(640, 480, 2);
        oh.ingest(&blank, -2.0, 90.0, 0).unwrap();
        assert_eq!(oh.map().count_over(0), 0);
    }

    #[test]
    fn gap_fill_needs_support() {
        let mut map = Image::new(10, 10, 1);
        map.fill_roi(&Roi::new(0, 0, 4, 10), 50);
        let mut tmp = Image::default();
        // a 3x3 box on column 4 holds 3 observed cells (2 on the top and bottom rows)
        assert_eq!(fill_gaps(&mut map, &mut tmp, 3, 7), 0);
        assert_eq!(fill_gaps(&mut map, &mut tmp, 3, 3), 8);
        assert_eq!(map.get(4, 5), 50);
        assert_eq!(map.get(5, 5), 0);
    }

    #[test]
    fn deviation_renderer_levels() {
        let mut oh = overhead();
        oh.set_plane(0.0, 0.0, 10.0);
        let mut hts = Image::new(100, 100, 1);
        hts.fill(oh.encode(10.0));
        hts.set(5, 5, oh.encode(30.0));
        hts.set(6, 5, oh.encode(0.0));
        hts.set(7, 5, 0);
        let mut dev = Image::default();
        oh.plane_dev(&mut dev, &hts).unwrap();
        assert!((dev.get(50, 50) as i32 - 128).abs() <= 1);
        assert_eq!(dev.get(5, 5), DEV_ABOVE);
        assert_eq!(dev.get(6, 5), DEV_BELOW);
        assert_eq!(dev.get(7, 5), 0);
    }

    #[test]
    fn map_plane_follows_slope() {
        let mut oh = overhead();
        let mut hts = Image::new(100, 100, 1);
        for j in 0..100 {
            for i in 0..100 {
                let (wx, _) = oh.geometry().to_world(i as f64, j as f64);
                hts.set(i, j, oh.encode(20.0 + 0.1 * wx));
            }
        }
        oh.map.clone_from_image(&hts);
        let (a, b, c) = oh.fit_map_plane(&Roi::new(0, 0, 100, 100)).unwrap();
        assert!((a - 0.1).abs() < 0.01 && b.abs() < 0.01 && (c - 20.0).abs() < 0.5);
        let mut dev = Image::default();
        oh.plane_dev(&mut dev, &hts).unwrap();
        assert!((dev.get(10, 40) as i32 - 128).abs() <= 12);
    }

    #[test]
    fn correct_undoes_quarter_roll() {
        let mut oh = overhead();
        let mut src = Image::new(640, 480, 3);
        src.fill_roi(&Roi::new(0, 0, 10, 10), 200);

        oh.set_cam(0, CameraRecord::new(0, [0.0; 3], 0.0, 0.0, 2.0)).unwrap();
        let mut out = Image::default();
        oh.correct(&mut out, &src, 0).unwrap();
        assert_eq!(out, src);

        oh.set_cam(0, CameraRecord::new(0, [0.0; 3], 0.0, 0.0, 90.0)).unwrap();
        oh.correct(&mut out, &src, 0).unwrap();
        assert_eq!((out.width(), out.height()), (480, 640));
        let mut back = Image::default();
        toolkit::rotate_quarter(&mut back, &out, 1).unwrap();
        assert_eq!(back, src);

        // tall frames are halved unless big frames are kept
        let tall = Image::new(1280, 960, 3);
        oh.correct(&mut out, &tall, 0).unwrap();
        assert_eq!((out.width(), out.height()), (480, 640));
        oh.ps.big = true;
        oh.correct(&mut out, &tall, 0).unwrap();
        assert_eq!((out.width(), out.height()), (960, 1280));
    }
}
