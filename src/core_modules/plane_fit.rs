// THEORY:
// The `PlaneFitter` estimates how a depth camera sits above a large planar surface
// (normally the floor): its tilt, its roll and its height above the plane. Everything
// downstream (overhead projection, person detection, obstacle scoring) is expressed
// relative to this plane, so the fitter has to be robust against furniture, people and
// walls that occupy most of the picture.
//
// Key architectural principles & algorithm steps:
// 1.  **Bands**: the image is cut into parallel strips. In each sampled row of a strip
//     only the farthest valid pixel survives, since anything standing on the floor is
//     nearer to the camera than the floor behind it.
// 2.  **Depth sort**: a strip's points are bucketed by depth. Walking outwards from the
//     camera, the image row of a floor point can only rise; points that fall back are
//     marked as bad slope.
// 3.  **Incremental line**: each strip fits z = m·y + b in the camera's YZ projection,
//     adding points nearest-first, and stops as soon as the fit quality (R² × 100) drops.
//     This trims the far end where the floor meets a wall.
// 4.  **Clique**: strips that agree on offset and angle are merged one at a time, nearest
//     offset first, and each merge must not inflate the orthogonal residual. The
//     deepest strip seeds the clique; if it cannot gather enough partners the next one
//     is tried.
// 5.  **Closed-form plane**: the clique's moment sums give z = a·x + b·y + c by a direct
//     3x3 solve, from which height, tilt and roll follow.
//
// Coordinates: camera x right, y forward along the optical axis, z up, all in inches.
// Failure never disturbs the last good estimate.

use nalgebra::{Matrix3, Vector3};

use crate::core_modules::image::Image;
use crate::params::{ParamSet, Tunable};

/// Number of depth buckets used for the per-band sort.
const BINS: usize = 1000;
/// Width of one depth bucket in raw depth units.
const BIN_WIDTH: u32 = 40;
/// Points a band line needs before R² is allowed to stop its growth.
const GROW_MIN: usize = 10;

/// Which image edge the floor is expected to occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanDir {
    /// Floor at the bottom of the image (upright camera).
    #[default]
    Up,
    /// Floor at the top (camera mounted upside down).
    Down,
    /// Floor on the left edge (camera rolled clockwise a quarter turn).
    Left,
    /// Floor on the right edge.
    Right,
}

/// Tunable knobs of the fitter.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaneParams {
    pub bands: usize,
    pub xstep: usize,
    pub ystep: usize,
    pub fmin: f64,
    pub pmin: usize,
    pub bmin: usize,
    pub htol: f64,
    pub atol: f64,
    pub dev: f64,
    pub sfloor: f64,
    pub hgate: f64,
    pub dlo: u16,
    pub dhi: u16,
}

impl Default for PlaneParams {
    fn default() -> Self {
        Self {
            bands: 8,
            xstep: 4,
            ystep: 4,
            fmin: 90.0,
            pmin: 5,
            bmin: 3,
            htol: 10.0,
            atol: 5.0,
            dev: 1.8,
            sfloor: 0.1,
            hgate: 12.0,
            dlo: 1760,
            dhi: 40000,
        }
    }
}

impl Tunable for PlaneParams {
    fn params(&self) -> ParamSet {
        let d = Self::default();
        ParamSet::new("plane")
            .int("bands", self.bands as i64, d.bands as i64, "Parallel bands per image")
            .int("xstep", self.xstep as i64, d.xstep as i64, "Column subsampling in band")
            .int("ystep", self.ystep as i64, d.ystep as i64, "Row subsampling in band")
            .float("fmin", self.fmin, d.fmin, "Min band line R2 (x100)")
            .int("pmin", self.pmin as i64, d.pmin as i64, "Min points on band line")
            .int("bmin", self.bmin as i64, d.bmin as i64, "Min bands in clique")
            .float("htol", self.htol, d.htol, "Band offset tolerance (pct)")
            .float("atol", self.atol, d.atol, "Band angle tolerance (deg)")
            .float("dev", self.dev, d.dev, "Max stdev growth on merge")
            .float("sfloor", self.sfloor, d.sfloor, "Stdev floor for merge test (in)")
            .float("hgate", self.hgate, d.hgate, "Drop past hinted height (in)")
            .int("dlo", self.dlo as i64, d.dlo as i64, "Min valid raw depth")
            .int("dhi", self.dhi as i64, d.dhi as i64, "Max valid raw depth")
    }

    fn set_params(&mut self, ps: &ParamSet) {
        self.bands = ps.usize_or("bands", self.bands).max(1);
        self.xstep = ps.usize_or("xstep", self.xstep).max(1);
        self.ystep = ps.usize_or("ystep", self.ystep).max(1);
        self.fmin = ps.f64_or("fmin", self.fmin);
        self.pmin = ps.usize_or("pmin", self.pmin);
        self.bmin = ps.usize_or("bmin", self.bmin).max(1);
        self.htol = ps.f64_or("htol", self.htol);
        self.atol = ps.f64_or("atol", self.atol);
        self.dev = ps.f64_or("dev", self.dev);
        self.sfloor = ps.f64_or("sfloor", self.sfloor);
        self.hgate = ps.f64_or("hgate", self.hgate);
        self.dlo = ps.i64_or("dlo", self.dlo as i64).clamp(0, u16::MAX as i64) as u16;
        self.dhi = ps.i64_or("dhi", self.dhi as i64).clamp(0, u16::MAX as i64) as u16;
    }
}

/// Running plane statistics laid out as the classic 14-slot vector:
/// `[Sx, Sy, Sz, Sxx, Syy, Szz, Sxy, Sxz, Syz, n, stdev, height, tilt, roll]`.
/// Slots 10..14 are derived by `plane_err` from slots 0..10.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlaneStats(pub [f64; 14]);

impl PlaneStats {
    pub const N: usize = 9;
    pub const STDEV: usize = 10;
    pub const HEIGHT: usize = 11;
    pub const TILT: usize = 12;
    pub const ROLL: usize = 13;

    pub fn clear(&mut self) {
        self.0 = [0.0; 14];
    }

    pub fn add_point(&mut self, x: f64, y: f64, z: f64) {
        let s = &mut self.0;
        s[0] += x;
        s[1] += y;
        s[2] += z;
        s[3] += x * x;
        s[4] += y * y;
        s[5] += z * z;
        s[6] += x * y;
        s[7] += x * z;
        s[8] += y * z;
        s[9] += 1.0;
    }

    /// Add the raw sums of another set (derived slots are left stale).
    pub fn merge(&mut self, other: &PlaneStats) {
        for i in 0..10 {
            self.0[i] += other.0[i];
        }
    }

    /// Remove the raw sums of a subset previously merged in.
    pub fn remove(&mut self, other: &PlaneStats) {
        for i in 0..10 {
            self.0[i] -= other.0[i];
        }
    }

    pub fn count(&self) -> usize {
        self.0[Self::N].max(0.0) as usize
    }

    pub fn stdev(&self) -> f64 {
        self.0[Self::STDEV]
    }

    pub fn height(&self) -> f64 {
        self.0[Self::HEIGHT]
    }

    pub fn tilt(&self) -> f64 {
        self.0[Self::TILT]
    }

    pub fn roll(&self) -> f64 {
        self.0[Self::ROLL]
    }

    /// Least-squares plane z = a·x + b·y + c, or `None` when the points are degenerate.
    pub fn solve(&self) -> Option<(f64, f64, f64)> {
        let s = &self.0;
        if s[9] < 3.0 {
            return None;
        }
        let m = Matrix3::new(s[3], s[6], s[0], s[6], s[4], s[1], s[0], s[1], s[9]);
        let scale = (s[3] * s[4] * s[9]).abs();
        if scale <= 0.0 || (m.determinant() / scale).abs() < 1e-10 {
            return None;
        }
        let inv = m.try_inverse()?;
        let abc = inv * Vector3::new(s[7], s[8], s[2]);
        Some((abc[0], abc[1], abc[2]))
    }

    /// Fill the derived slots from the sums. Returns the orthogonal stdev, or `None`
    /// (derived slots untouched) if no plane can be solved.
    pub fn plane_err(&mut self) -> Option<f64> {
        let (a, b, c) = self.solve()?;
        let s = &self.0;
        let n = s[9];
        let resid = s[5] - 2.0 * a * s[7] - 2.0 * b * s[8] - 2.0 * c * s[2]
            + a * a * s[3]
            + b * b * s[4]
            + c * c * n
            + 2.0 * a * b * s[6]
            + 2.0 * a * c * s[0]
            + 2.0 * b * c * s[1];
        let norm = (a * a + b * b + 1.0).sqrt();
        let sd = (resid.max(0.0) / (norm * norm * n)).sqrt();
        let s = &mut self.0;
        s[Self::STDEV] = sd;
        s[Self::HEIGHT] = -c / norm;
        s[Self::TILT] = (-b).atan2((1.0 + a * a).sqrt()).to_degrees();
        s[Self::ROLL] = a.atan().to_degrees();
        Some(sd)
    }
}

/// Running sums for a line z = m·y + b in the YZ projection.
#[derive(Debug, Clone, Copy, Default)]
struct LineSums {
    sy: f64,
    sz: f64,
    syy: f64,
    szz: f64,
    syz: f64,
    n: usize,
}

impl LineSums {
    fn add(&mut self, y: f64, z: f64) {
        self.sy += y;
        self.sz += z;
        self.syy += y * y;
        self.szz += z * z;
        self.syz += y * z;
        self.n += 1;
    }

    fn sub(&mut self, y: f64, z: f64) {
        self.sy -= y;
        self.sz -= z;
        self.syy -= y * y;
        self.szz -= z * z;
        self.syz -= y * z;
        self.n -= 1;
    }

    fn centered(&self) -> (f64, f64, f64) {
        let n = self.n as f64;
        (
            self.syy - self.sy * self.sy / n,
            self.szz - self.sz * self.sz / n,
            self.syz - self.sy * self.sz / n,
        )
    }

    /// Pearson R² on the ×100 scale, quantized to 0.01.
    fn r2(&self) -> f64 {
        if self.n < 2 {
            return 0.0;
        }
        let (vy, vz, vyz) = self.centered();
        let r = if vz <= 1e-9 * (1.0 + vy) {
            100.0
        } else if vy <= 1e-12 {
            0.0
        } else {
            100.0 * vyz * vyz / (vy * vz)
        };
        (r * 100.0).round() / 100.0
    }

    fn line(&self) -> (f64, f64) {
        let (vy, _, vyz) = self.centered();
        let n = self.n as f64;
        let m = if vy > 1e-12 { vyz / vy } else { 0.0 };
        (m, (self.sz - m * self.sy) / n)
    }

    /// Orthogonal stdev of the points about the fitted line.
    fn stdev(&self) -> f64 {
        if self.n < 2 {
            return 0.0;
        }
        let (vy, vz, vyz) = self.centered();
        let (m, _) = self.line();
        let resid = vz - 2.0 * m * vyz + m * m * vy;
        (resid.max(0.0) / ((m * m + 1.0) * self.n as f64)).sqrt()
    }
}

/// One retained sample of a band.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BandPoint {
    /// 1 candidate, 0 unused (past the line's end), -1 bad slope, -2 outside height gate.
    pub ok: i8,
    pub ix: i32,
    pub iy: i32,
    pub iz: u16,
    pub cx: f64,
    pub cy: f64,
    pub cz: f64,
}

/// Line fit and bookkeeping for one band.
#[derive(Debug, Clone, Default)]
pub struct Band {
    pub pts: Vec<BandPoint>,
    pub r2: f64,
    /// Line angle atan(m) in degrees.
    pub angle: f64,
    /// Perpendicular distance of the line below the camera.
    pub offset: f64,
    /// Points on the accepted line.
    pub used: usize,
    /// -1 discarded, 0 outside clique, 1 in clique.
    pub keep: i8,
    stats: PlaneStats,
    lstd: f64,
}

/// A successful plane estimate.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlanePose {
    pub tilt: f64,
    pub roll: f64,
    pub height: f64,
    pub stdev: f64,
    pub npts: usize,
    pub nbands: usize,
}

/// Planar-surface description reported by `surface_data`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SurfaceData {
    pub ha: f64,
    pub va: f64,
    pub d: f64,
}

/// Banded, clique-based plane estimator for depth images.
#[derive(Debug, Clone)]
pub struct PlaneFitter {
    pub ps: PlaneParams,
    focal: f64,
    scale: f64,
    bands: Vec<Band>,
    bin_cnt: Vec<usize>,
    order: Vec<usize>,
    last: PlanePose,
    last_stats: PlaneStats,
}

impl Default for PlaneFitter {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaneFitter {
    pub fn new() -> Self {
        Self {
            ps: PlaneParams::default(),
            focal: 525.0,
            scale: 1.0 / (4.0 * 25.4),
            bands: Vec::new(),
            bin_cnt: vec![0; BINS],
            order: Vec::new(),
            last: PlanePose::default(),
            last_stats: PlaneStats::default(),
        }
    }

    /// Set the intrinsic focal length (pixels) and inches per raw depth unit.
    pub fn set_optics(&mut self, focal: f64, scale: f64) {
        self.focal = focal;
        self.scale = scale;
    }

    pub fn focal(&self) -> f64 {
        self.focal
    }

    /// Most recent successful estimate (unchanged by failures).
    pub fn last(&self) -> PlanePose {
        self.last
    }

    /// Plane sums of the most recent successful clique.
    pub fn last_stats(&self) -> PlaneStats {
        self.last_stats
    }

    pub fn band(&self, b: usize) -> Option<&Band> {
        self.bands.get(b)
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    /// Bands currently in the clique.
    pub fn clique_size(&self) -> usize {
        self.bands.iter().filter(|b| b.keep == 1).count()
    }

    /// Fit the floor plane of a 16-bit depth image.
    pub fn fit_3d(&mut self, depth: &Image, dir: ScanDir, hint: Option<f64>) -> Option<PlanePose> {
        self.fit_3d_masked(depth, None, dir, hint)
    }

    /// As `fit_3d`, but only pixels where `mask` is non-zero are sampled.
    pub fn fit_3d_masked(
        &mut self,
        depth: &Image,
        mask: Option<&Image>,
        dir: ScanDir,
        hint: Option<f64>,
    ) -> Option<PlanePose> {
        if depth.fields() != 2 || !depth.is_valid() {
            log::error!("fit_3d: needs a 16-bit depth image, got {}", depth.describe());
            return None;
        }
        if let Some(m) = mask {
            if m.fields() != 1 || !m.same_size(depth) {
                log::error!("fit_3d: mask {} does not match depth {}", m.describe(), depth.describe());
                return None;
            }
        }
        self.sample_bands(depth, mask, dir, hint);
        for b in 0..self.bands.len() {
            self.fit_band(b);
        }
        let pose = self.build_clique()?;
        self.last = pose;
        Some(pose)
    }

    /// Coarse description of the dominant surface. Only band diagnostics are produced;
    /// the angles and distance are reported as zero.
    pub fn surface_data(&self) -> SurfaceData {
        for (i, b) in self.bands.iter().enumerate() {
            log::debug!(
                "band {}: n={} r2={:.2} ang={:.2} off={:.2} keep={}",
                i, b.used, b.r2, b.angle, b.offset, b.keep
            );
        }
        SurfaceData::default()
    }

    // --- step 1: sampling ---

    fn sample_bands(&mut self, depth: &Image, mask: Option<&Image>, dir: ScanDir, hint: Option<f64>) {
        let nb = self.ps.bands.max(1);
        self.bands.resize_with(nb, Band::default);
        for b in &mut self.bands {
            b.pts.clear();
            b.keep = -1;
            b.used = 0;
        }
        let (w, h) = (depth.width() as i32, depth.height() as i32);
        let (cw, ch) = match dir {
            ScanDir::Up | ScanDir::Down => (w, h),
            ScanDir::Left | ScanDir::Right => (h, w),
        };
        let to_pixel = |bu: i32, bv: i32| -> (i32, i32) {
            match dir {
                ScanDir::Up => (bu, bv),
                ScanDir::Down => (w - 1 - bu, h - 1 - bv),
                ScanDir::Left => (bv, h - 1 - bu),
                ScanDir::Right => (w - 1 - bv, bu),
            }
        };
        let roi = depth.roi();
        let (cu, cv) = (0.5 * (cw - 1) as f64, 0.5 * (ch - 1) as f64);
        let (xs, ys) = (self.ps.xstep.max(1), self.ps.ystep.max(1));
        let (lo, hi) = (self.ps.dlo, self.ps.dhi);
        let gate = hint.map(|v| v + self.ps.hgate);
        for (b, band) in self.bands.iter_mut().enumerate() {
            let u0 = (b as i32 * cw) / nb as i32;
            let u1 = ((b as i32 + 1) * cw) / nb as i32;
            for bv in (0..ch).step_by(ys) {
                let mut best: Option<(i32, u16)> = None;
                for bu in (u0..u1).step_by(xs) {
                    let (px, py) = to_pixel(bu, bv);
                    if !roi.contains(px, py) {
                        continue;
                    }
                    if let Some(m) = mask {
                        if m.get(px as usize, py as usize) == 0 {
                            continue;
                        }
                    }
                    let d = depth.get16(px as usize, py as usize);
                    if d < lo || d > hi {
                        continue;
                    }
                    if best.is_none_or(|(_, bd)| d > bd) {
                        best = Some((bu, d));
                    }
                }
                let Some((bu, d)) = best else {
                    continue;
                };
                let cy = d as f64 * self.scale;
                let cx = (bu as f64 - cu) * cy / self.focal;
                let cz = (bv as f64 - cv) * cy / self.focal;
                let ok = match gate {
                    Some(g) if -cz < 0.0 || -cz > g => -2,
                    _ => 1,
                };
                band.pts.push(BandPoint { ok, ix: bu, iy: bv, iz: d, cx, cy, cz });
            }
        }
    }

    // --- steps 2 & 3: sort and grow line ---

    fn fit_band(&mut self, b: usize) {
        let band = &mut self.bands[b];
        let pts = &mut band.pts;

        // counting sort by depth bucket, stable so rows stay in order within a bucket
        self.bin_cnt.iter_mut().for_each(|c| *c = 0);
        let bin_of = |d: u16| ((d as u32 / BIN_WIDTH) as usize).min(BINS - 1);
        for p in pts.iter().filter(|p| p.ok == 1) {
            self.bin_cnt[bin_of(p.iz)] += 1;
        }
        let mut start = 0;
        for c in self.bin_cnt.iter_mut() {
            let n = *c;
            *c = start;
            start += n;
        }
        self.order.clear();
        self.order.resize(start, 0);
        for (i, p) in pts.iter().enumerate().filter(|(_, p)| p.ok == 1) {
            let slot = &mut self.bin_cnt[bin_of(p.iz)];
            self.order[*slot] = i;
            *slot += 1;
        }

        // monotone rows: moving away from the camera the floor can only climb the image
        let mut prev: Option<i32> = None;
        for &i in &self.order {
            if prev.is_some_and(|py| pts[i].iy < py) {
                pts[i].ok = -1;
            } else {
                prev = Some(pts[i].iy);
            }
        }

        let mut sums = LineSums::default();
        let mut best = f64::MIN;
        let mut stop = false;
        for &i in &self.order {
            if pts[i].ok != 1 {
                continue;
            }
            if stop {
                pts[i].ok = 0;
                continue;
            }
            let (y, z) = (pts[i].cy, pts[i].cz);
            sums.add(y, z);
            if sums.n >= GROW_MIN {
                let r = sums.r2();
                if r < best {
                    sums.sub(y, z);
                    pts[i].ok = 0;
                    stop = true;
                    continue;
                }
                best = r;
            }
        }

        band.used = sums.n;
        band.stats.clear();
        for p in pts.iter().filter(|p| p.ok == 1) {
            band.stats.add_point(p.cx, p.cy, p.cz);
        }
        if sums.n < 2 {
            band.r2 = 0.0;
            band.keep = -1;
            return;
        }
        let (m, off) = sums.line();
        band.r2 = sums.r2();
        band.angle = m.atan().to_degrees();
        band.offset = -off / (m * m + 1.0).sqrt();
        band.lstd = sums.stdev();
        band.keep = if band.r2 < self.ps.fmin || band.used < self.ps.pmin { -1 } else { 0 };
        log::trace!(
            "band {}: {} pts r2 {:.2} angle {:.2} offset {:.2}",
            b, band.used, band.r2, band.angle, band.offset
        );
    }

    // --- steps 4 to 6: clique and plane ---

    fn build_clique(&mut self) -> Option<PlanePose> {
        let mut seeds: Vec<usize> = (0..self.bands.len()).filter(|&b| self.bands[b].keep == 0).collect();
        seeds.sort_by(|&a, &b| self.bands[b].offset.total_cmp(&self.bands[a].offset));

        for &base in &seeds {
            for band in self.bands.iter_mut() {
                if band.keep == 1 {
                    band.keep = 0;
                }
            }
            if self.bands[base].keep < 0 {
                continue;
            }
            if let Some(pose) = self.grow_clique(base) {
                return Some(pose);
            }
            self.bands[base].keep = -1;
        }
        for band in self.bands.iter_mut() {
            if band.keep == 1 {
                band.keep = 0;
            }
        }
        log::debug!("fit_3d: no clique of {} bands", self.ps.bmin);
        None
    }

    fn grow_clique(&mut self, base: usize) -> Option<PlanePose> {
        let mut stats = self.bands[base].stats;
        let mut sd = self.bands[base].lstd;
        let mut off = self.bands[base].offset;
        let mut ang = self.bands[base].angle;
        let mut wt = self.bands[base].used as f64;
        let mut tried = vec![false; self.bands.len()];
        self.bands[base].keep = 1;
        tried[base] = true;
        let mut members = 1;

        loop {
            let pick = (0..self.bands.len())
                .filter(|&j| !tried[j] && self.bands[j].keep == 0)
                .min_by(|&a, &b| {
                    let da = (self.bands[a].offset - off).abs();
                    let db = (self.bands[b].offset - off).abs();
                    da.total_cmp(&db)
                });
            let Some(j) = pick else {
                break;
            };
            tried[j] = true;
            let cand = &self.bands[j];
            if (cand.offset - off).abs() > 0.01 * self.ps.htol * off.abs() {
                break;
            }
            if (cand.angle - ang).abs() > self.ps.atol {
                continue;
            }
            let mut trial = stats;
            trial.merge(&cand.stats);
            let Some(sd2) = trial.plane_err() else {
                continue;
            };
            if sd2 > self.ps.dev * sd.max(self.ps.sfloor) {
                continue;
            }
            let cw = cand.used as f64;
            off = (off * wt + cand.offset * cw) / (wt + cw);
            ang = (ang * wt + cand.angle * cw) / (wt + cw);
            wt += cw;
            stats = trial;
            sd = sd2;
            self.bands[j].keep = 1;
            members += 1;
        }

        if members < self.ps.bmin {
            return None;
        }
        stats.plane_err()?;
        self.last_stats = stats;
        let pose = PlanePose {
            tilt: stats.tilt(),
            roll: stats.roll(),
            height: stats.height(),
            stdev: stats.stdev(),
            npts: stats.count(),
            nbands: members,
        };
        log::debug!(
            "fit_3d: {} bands {} pts tilt {:.2} roll {:.2} height {:.2} sd {:.3}",
            pose.nbands, pose.npts, pose.tilt, pose.roll, pose.height, pose.stdev
        );
        Some(pose)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Depth image of an endless floor seen by a camera with elevation `tilt`, roll `roll`
    /// (degrees), `height` inches above the floor, focal length 525 px.
    pub(crate) fn synth_floor(w: usize, h: usize, tilt: f64, roll: f64, height: f64) -> Image {
        let (t, r) = (tilt.to_radians(), roll.to_radians());
        let n = [-r.sin() * t.cos(), t.sin(), r.cos() * t.cos()];
        let (cu, cv, f) = (0.5 * (w - 1) as f64, 0.5 * (h - 1) as f64, 525.0);
        let mut img = Image::new(w, h, 2);
        for v in 0..h {
            for u in 0..w {
                let d = [(u as f64 - cu) / f, 1.0, (v as f64 - cv) / f];
                let nd = n[0] * d[0] + n[1] * d[1] + n[2] * d[2];
                if nd >= 0.0 {
                    continue;
                }
                let raw = (-height / nd * 101.6).round();
                if (1760.0..=40000.0).contains(&raw) {
                    img.set16(u, v, raw as u16);
                }
            }
        }
        img
    }

    #[test]
    fn recovers_synthetic_floor() {
        let depth = synth_floor(640, 480, 5.0, 2.0, 44.6);
        let mut fit = PlaneFitter::new();
        let pose = fit.fit_3d(&depth, ScanDir::Up, None).expect("floor should fit");
        assert!((pose.tilt - 5.0).abs() < 1.0, "tilt {}", pose.tilt);
        assert!((pose.roll - 2.0).abs() < 1.0, "roll {}", pose.roll);
        assert!((pose.height - 44.6).abs() < 1.0, "height {}", pose.height);
        assert!(pose.nbands >= 3);
    }

    #[test]
    fn empty_image_fails_and_keeps_estimate() {
        let depth = synth_floor(320, 240, -10.0, 0.0, 40.0);
        let mut fit = PlaneFitter::new();
        let good = fit.fit_3d(&depth, ScanDir::Up, None).expect("floor should fit");
        let blank = Image::new(320, 240, 2);
        assert!(fit.fit_3d(&blank, ScanDir::Up, None).is_none());
        assert_eq!(fit.last(), good);
    }

    #[test]
    fn height_gate_rejects_floor_below_hint() {
        // camera looking slightly up: every floor point drops more than 44 inches
        let depth = synth_floor(640, 480, 5.0, 2.0, 44.6);
        let mut fit = PlaneFitter::new();
        assert!(fit.fit_3d(&depth, ScanDir::Up, Some(10.0)).is_none());
        let band = fit.band(3).unwrap();
        assert!(!band.pts.is_empty());
        assert!(band.pts.iter().all(|p| p.ok == -2));

        // looking down from 40 inches every floor point is within the gate
        let down = synth_floor(320, 240, -10.0, 0.0, 40.0);
        let pose = fit.fit_3d(&down, ScanDir::Up, Some(40.0)).expect("gate should pass floor");
        assert!((pose.height - 40.0).abs() < 1.0);
    }

    #[test]
    fn plane_err_is_idempotent() {
        let mut s = PlaneStats::default();
        for (x, y) in [(0.0, 50.0), (10.0, 60.0), (-10.0, 70.0), (5.0, 90.0)] {
            s.add_point(x, y, -40.0 + 0.1 * y);
        }
        s.plane_err().unwrap();
        let once = s;
        s.plane_err().unwrap();
        assert_eq!(once, s);
        assert!(s.stdev() < 1e-6);
    }

    #[test]
    fn collinear_points_are_singular() {
        let mut s = PlaneStats::default();
        for y in 0..10 {
            s.add_point(0.0, y as f64 * 10.0, -30.0);
        }
        assert!(s.solve().is_none());
    }

    #[test]
    fn level_line_scores_full_r2() {
        let mut l = LineSums::default();
        for y in 0..12 {
            l.add(50.0 + y as f64, -40.0);
        }
        assert_eq!(l.r2(), 100.0);
        assert!(l.stdev() < 1e-9);
    }
}
