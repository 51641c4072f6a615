// Frame conditioning ahead of the salience cues: contrast stretch, jitter alignment,
// NTSC chroma suppression, per-pixel temporal smoothing and gain compensation.

use super::{BgSubtractor, VALID};
use crate::core_modules::image::Image;
use crate::core_modules::toolkit;

/// Process noise added to each pixel's variance per frame (levels squared).
const KQ: f32 = 1.0;

impl BgSubtractor {
    /// Linear stretch between tracked low and high percentiles of brightness.
    pub(super) fn stretch(&mut self) {
        let mut hist = [0usize; 256];
        for y in 0..self.src.height() {
            for x in 0..self.src.width() {
                hist[self.src.mono_at(x, y) as usize] += 1;
            }
        }
        let total = self.src.pixel_count();
        let level = |frac: f64| {
            let goal = (frac * total as f64) as usize;
            let mut acc = 0;
            for (v, &n) in hist.iter().enumerate() {
                acc += n;
                if acc > goal {
                    return v as f64;
                }
            }
            255.0
        };
        let (lo, hi) = (level(self.ps.plo), level(self.ps.phi));
        if (lo - self.slo).abs() > self.ps.shys {
            self.slo = lo;
        }
        if (hi - self.shi).abs() > self.ps.shys {
            self.shi = hi;
        }
        if self.shi - self.slo < 16.0 {
            return;
        }
        let k = 255.0 / (self.shi - self.slo);
        let lut: Vec<u8> =
            (0..256).map(|v| ((v as f64 - self.slo) * k).round().clamp(0.0, 255.0) as u8).collect();
        for y in 0..self.src.height() {
            for v in self.src.row_mut(y).iter_mut() {
                *v = lut[*v as usize];
            }
        }
    }

    /// Align the frame to the jitter reference. Returns false when no acceptable shift
    /// exists (residual too large, or the best shift sits at the search limit); the frame
    /// is then resampled by the last accepted shift so it stays registered with the model.
    pub(super) fn dejitter(&mut self) -> bool {
        self.tmp.set_size(self.src.width(), self.src.height(), 1);
        if let Err(e) = toolkit::mono(&mut self.tmp, &self.src) {
            log::error!("background: mono conversion failed: {}", e);
            return false;
        }
        if !self.have_ref || !self.ref_mono.same_size(&self.tmp) {
            self.take_reference();
            return true;
        }
        self.ref_age += 1;

        let fit = {
            let (xr, yr) = (self.ps.xrng.max(0), self.ps.yrng.max(0));
            let trusted = if self.initialized && self.valid.same_size(&self.tmp) && self.prev_fg.same_size(&self.tmp) {
                Some((&self.valid, &self.prev_fg))
            } else {
                None
            };
            let m = Matcher::new(&self.tmp, &self.ref_mono, trusted, xr + 1, yr + 1);

            // coarse search over every integer shift on a checkerboard of samples
            let mut best = (0, 0, m.cost(0, 0, true));
            for dy in -yr..=yr {
                for dx in -xr..=xr {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let c = m.cost(dx, dy, true);
                    if c < best.2 {
                        best = (dx, dy, c);
                    }
                }
            }
            let (bx, by, _) = best;

            // fine costs on every sample around the winner
            let c0 = m.cost(bx, by, false);
            if c0 > self.ps.jbad || (bx != 0 && bx.abs() >= xr) || (by != 0 && by.abs() >= yr) {
                None
            } else {
                let (cxm, cxp) = (m.cost(bx - 1, by, false), m.cost(bx + 1, by, false));
                let (cym, cyp) = (m.cost(bx, by - 1, false), m.cost(bx, by + 1, false));
                // at rest, costs that differ only by sampling noise mean no sub-pixel motion
                let tol = 3.0 * c0 / (m.samples().max(1) as f64).sqrt();
                let sub = |cm: f64, cp: f64| {
                    if bx == 0 && by == 0 && (cm - cp).abs() <= tol { 0.0 } else { vertex(cm, c0, cp) }
                };
                Some((bx as f64 + sub(cxm, cxp), by as f64 + sub(cym, cyp)))
            }
        };

        let Some((sx, sy)) = fit else {
            self.bad_run += 1;
            if self.bad_run % self.ps.jreset.max(1) == 0 {
                log::info!("background: {} frames without alignment, new jitter reference", self.bad_run);
                self.take_reference();
            } else {
                self.resample(self.shift);
            }
            return false;
        };
        self.bad_run = 0;
        self.shift = (sx, sy);
        self.resample(self.shift);
        if self.ps.jrows {
            self.fix_rows();
        }
        if self.ref_age > self.ps.st_cnt {
            match toolkit::mono(&mut self.ref_mono, &self.src) {
                Ok(()) => self.ref_age = 0,
                Err(e) => {
                    log::error!("background: jitter reference refresh failed: {}", e);
                    self.have_ref = false;
                }
            }
        }
        true
    }

    /// Use the current (unshifted) frame as the jitter reference.
    fn take_reference(&mut self) {
        self.ref_mono.clone_from_image(&self.tmp);
        self.have_ref = true;
        self.ref_age = 0;
        self.shift = (0.0, 0.0);
    }

    /// Bilinear resample of the source by a sub-pixel shift; small shifts are ignored.
    fn resample(&mut self, (sx, sy): (f64, f64)) {
        if sx.abs() < self.ps.jmin && sy.abs() < self.ps.jmin {
            return;
        }
        let mut moved = Image::like(&self.src);
        for y in 0..self.src.height() {
            for x in 0..self.src.width() {
                let mut px = [0u8; 3];
                for (c, p) in px.iter_mut().enumerate() {
                    let v = toolkit::bilinear(&self.src, x as f64 + sx, y as f64 + sy, c);
                    *p = v.round().clamp(0.0, 255.0) as u8;
                }
                moved.set_bgr(x, y, px);
            }
        }
        self.src = moved;
    }

    /// Per-row one pixel tear correction against the reference.
    fn fix_rows(&mut self) {
        let w = self.src.width() as i32;
        if toolkit::mono(&mut self.tmp, &self.src).is_err() || w < 4 {
            return;
        }
        for y in 0..self.src.height() {
            let row_cost = |dx: i32| {
                let mut s = 0i64;
                for x in 1..w - 1 {
                    let a = self.tmp.get((x + dx) as usize, y) as i64;
                    s += (a - self.ref_mono.get(x as usize, y) as i64).abs();
                }
                s
            };
            let c0 = row_cost(0);
            let (cl, cr) = (row_cost(-1), row_cost(1));
            let dx = if cl < c0 && cl <= cr {
                -1
            } else if cr < c0 {
                1
            } else {
                continue;
            };
            let row: Vec<[u8; 3]> = (0..w).map(|x| self.src.get_bgr((x + dx).clamp(0, w - 1) as usize, y)).collect();
            for (x, px) in row.into_iter().enumerate() {
                self.src.set_bgr(x, y, px);
            }
        }
    }

    /// Replace colour by brightness on strong horizontal edges, where composite video
    /// smears chroma.
    pub(super) fn ntsc_fix(&mut self) {
        let w = self.src.width();
        for y in 0..self.src.height() {
            let m: Vec<u8> = (0..w).map(|x| self.src.mono_at(x, y)).collect();
            for x in 1..w.saturating_sub(1) {
                if (m[x + 1] as i32 - m[x - 1] as i32).abs() > self.ps.nedge {
                    self.src.set_bgr(x, y, [m[x]; 3]);
                }
            }
        }
    }

    /// Scalar Kalman filter per pixel and channel, with a gain floor of `f0` and a
    /// hard reset on large innovations.
    pub(super) fn kalman(&mut self) {
        let (w, h) = (self.src.width(), self.src.height());
        let n = w * h * 3;
        let r = (self.ps.knoise * self.ps.knoise) as f32;
        self.cur.set_size(w, h, 3);
        if self.kest.len() != n {
            self.kest = vec![0.0; n];
            self.kvar = vec![r; n];
            for y in 0..h {
                for x in 0..w {
                    let px = self.src.get_bgr(x, y);
                    for c in 0..3 {
                        self.kest[(y * w + x) * 3 + c] = px[c] as f32;
                    }
                }
            }
        }
        let (f0, kreset) = (self.ps.f0 as f32, self.ps.kreset as f32);
        for y in 0..h {
            for x in 0..w {
                let z = self.src.get_bgr(x, y);
                let mut out = [0u8; 3];
                for c in 0..3 {
                    let i = (y * w + x) * 3 + c;
                    let var = self.kvar[i] + KQ;
                    let e = z[c] as f32 - self.kest[i];
                    if e.abs() > kreset {
                        self.kest[i] = z[c] as f32;
                        self.kvar[i] = r;
                    } else {
                        let k = (var / (var + r)).max(f0);
                        self.kest[i] += k * e;
                        self.kvar[i] = (1.0 - k) * var;
                    }
                    out[c] = self.kest[i].round().clamp(0.0, 255.0) as u8;
                }
                self.cur.set_bgr(x, y, out);
            }
        }
    }

    /// Track the per-channel ratio between the background and the current frame over
    /// trusted background pixels and scale the frame by it.
    pub(super) fn gain_comp(&mut self) {
        if !self.cur.same_size(&self.bg) || !self.prev_fg.same_size(&self.cur) {
            return;
        }
        let (mut sb, mut sc, mut cnt) = ([0.0f64; 3], [0.0f64; 3], 0usize);
        for y in 0..self.cur.height() {
            for x in 0..self.cur.width() {
                if self.valid.get(x, y) < VALID || self.prev_fg.get(x, y) != 0 {
                    continue;
                }
                let (b, c) = (self.bg.get_bgr(x, y), self.cur.get_bgr(x, y));
                for k in 0..3 {
                    sb[k] += b[k] as f64;
                    sc[k] += c[k] as f64;
                }
                cnt += 1;
            }
        }
        if cnt * 10 < self.cur.pixel_count() {
            return;
        }
        for k in 0..3 {
            if sc[k] > 0.0 {
                let ratio = sb[k] / sc[k];
                self.gains[k] = (self.gains[k] + self.ps.gmix * (ratio - self.gains[k])).clamp(0.5, 2.0);
            }
        }
        if self.gains.iter().all(|g| (g - 1.0).abs() < 1e-3) {
            return;
        }
        for y in 0..self.cur.height() {
            for x in 0..self.cur.width() {
                let c = self.cur.get_bgr(x, y);
                let mut out = [0u8; 3];
                for k in 0..3 {
                    out[k] = (c[k] as f64 * self.gains[k]).round().clamp(0.0, 255.0) as u8;
                }
                self.cur.set_bgr(x, y, out);
            }
        }
    }
}

/// Block matcher between the current and reference brightness over the interior that
/// stays in bounds for every tested shift. Pixels the model does not trust (invalid or
/// foreground last frame) are left out while at least an eighth of the interior remains.
struct Matcher<'a> {
    cur: &'a Image,
    reference: &'a Image,
    keep: Option<Vec<bool>>,
    mx: i32,
    my: i32,
    n: usize,
}

impl<'a> Matcher<'a> {
    fn new(cur: &'a Image, reference: &'a Image, trusted: Option<(&Image, &Image)>, mx: i32, my: i32) -> Self {
        let (w, h) = (cur.width() as i32, cur.height() as i32);
        let interior = ((w - 2 * mx).max(0) * (h - 2 * my).max(0)) as usize;
        let mut m = Self { cur, reference, keep: None, mx, my, n: interior };
        if let Some((valid, fg)) = trusted {
            let mut keep = vec![false; cur.pixel_count()];
            let mut used = 0;
            for y in my..h - my {
                for x in mx..w - mx {
                    let (xu, yu) = (x as usize, y as usize);
                    if valid.get(xu, yu) >= VALID && fg.get(xu, yu) == 0 {
                        keep[yu * w as usize + xu] = true;
                        used += 1;
                    }
                }
            }
            if used * 8 >= interior && used > 0 {
                m.keep = Some(keep);
                m.n = used;
            }
        }
        m
    }

    /// Samples behind a fine cost.
    fn samples(&self) -> usize {
        self.n
    }

    /// Mean absolute difference with `cur` shifted by (dx, dy). The coarse pass takes a
    /// checkerboard so both column parities are represented.
    fn cost(&self, dx: i32, dy: i32, coarse: bool) -> f64 {
        let (w, h) = (self.cur.width() as i32, self.cur.height() as i32);
        let step = if coarse { 2 } else { 1 };
        let (mut s, mut n) = (0u64, 0u64);
        for y in self.my..h - self.my {
            let mut x = self.mx + if coarse { (y - self.my) & 1 } else { 0 };
            while x < w - self.mx {
                if self.keep.as_ref().is_none_or(|k| k[(y * w + x) as usize]) {
                    let a = self.cur.get((x + dx) as usize, (y + dy) as usize) as i32;
                    let b = self.reference.get(x as usize, y as usize) as i32;
                    s += (a - b).unsigned_abs() as u64;
                    n += 1;
                }
                x += step;
            }
        }
        if n == 0 { 0.0 } else { s as f64 / n as f64 }
    }
}

/// Sub-pixel offset of a parabola's vertex through three equally spaced costs.
fn vertex(cm: f64, c0: f64, cp: f64) -> f64 {
    let den = cm - 2.0 * c0 + cp;
    if den <= 1e-9 { 0.0 } else { (0.5 * (cm - cp) / den).clamp(-0.5, 0.5) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::background::BgParams;
    use crate::core_modules::background::tests::Lcg;

    fn textured(w: usize, h: usize, ox: usize, oy: usize) -> Image {
        let mut img = Image::new(w, h, 3);
        for y in 0..h {
            for x in 0..w {
                let v = ((((x + ox) / 3) * 37 + ((y + oy) / 3) * 91) % 180 + 40) as u8;
                img.set_bgr(x, y, [v, v, v]);
            }
        }
        img
    }

    #[test]
    fn parabola_vertex() {
        assert_eq!(vertex(4.0, 1.0, 4.0), 0.0);
        assert!(vertex(2.0, 1.0, 4.0) < 0.0);
        assert_eq!(vertex(1.0, 1.0, 1.0), 0.0);
    }

    #[test]
    fn dejitter_recovers_integer_shift() {
        let mut bg = BgSubtractor::new(BgParams::default());
        bg.src = textured(80, 60, 0, 0);
        assert!(bg.dejitter());
        bg.src = textured(80, 60, 2, 1);
        assert!(bg.dejitter());
        let (sx, sy) = bg.shift;
        assert!((sx + 2.0).abs() < 0.5 && (sy + 1.0).abs() < 0.5, "shift {:?}", bg.shift);
    }

    #[test]
    fn dejitter_rejects_new_scene() {
        let mut bg = BgSubtractor::new(BgParams::default());
        bg.src = textured(80, 60, 0, 0);
        assert!(bg.dejitter());
        let mut other = Image::new(80, 60, 3);
        other.fill(250);
        bg.src = other;
        assert!(!bg.dejitter());
    }

    /// Fine texture in 2x2 blocks with a level of per-pixel noise.
    fn fine_texture(rng: &mut Lcg) -> Image {
        let mut img = Image::new(160, 120, 3);
        for y in 0..120 {
            for x in 0..160 {
                let v = ((x / 2) * 37 + (y / 2) * 91) % 160 + 40;
                let v = (v + (rng.next() % 3) as usize - 1) as u8;
                img.set_bgr(x, y, [v, v, v]);
            }
        }
        img
    }

    #[test]
    fn still_fine_texture_is_not_resampled() {
        let mut bg = BgSubtractor::new(BgParams::default());
        let mut rng = Lcg(3);
        for k in 0..8 {
            let img = fine_texture(&mut rng);
            bg.src = img.clone();
            assert!(bg.dejitter(), "frame {}", k);
            let (sx, sy) = bg.shift;
            assert!(sx.abs() < bg.ps.jmin && sy.abs() < bg.ps.jmin, "frame {} shift {:?}", k, bg.shift);
            assert!(bg.src == img, "frame {} was resampled", k);
        }
    }

    #[test]
    fn matching_skips_untrusted_pixels() {
        let mut bg = BgSubtractor::new(BgParams::default());
        bg.src = textured(80, 60, 0, 0);
        assert!(bg.dejitter());

        // a flat object over 40% of the view, already known as foreground
        let mut seen = textured(80, 60, 0, 0);
        bg.valid = Image::new(80, 60, 1);
        bg.valid.fill(255);
        bg.prev_fg = Image::new(80, 60, 1);
        for y in 10..50 {
            for x in 10..58 {
                seen.set_bgr(x, y, [250, 250, 250]);
                bg.prev_fg.set(x, y, 255);
            }
        }
        bg.src = seen.clone();
        assert!(!bg.dejitter(), "whole-frame match should fail");

        bg.initialized = true;
        bg.src = seen;
        assert!(bg.dejitter());
        let (sx, sy) = bg.shift;
        assert!(sx.abs() < bg.ps.jmin && sy.abs() < bg.ps.jmin, "shift {:?}", bg.shift);
    }

    #[test]
    fn failed_alignment_keeps_last_shift_then_rebases() {
        let mut bg = BgSubtractor::new(BgParams::default());
        bg.src = textured(80, 60, 0, 0);
        assert!(bg.dejitter());
        bg.src = textured(80, 60, 2, 1);
        assert!(bg.dejitter());
        let last = bg.shift;

        let mut flat = Image::new(80, 60, 3);
        flat.fill(250);
        for k in 1..bg.ps.jreset {
            bg.src = flat.clone();
            assert!(!bg.dejitter());
            assert_eq!(bg.shift, last, "failure {}", k);
        }
        bg.src = flat.clone();
        assert!(!bg.dejitter());
        assert_eq!(bg.shift, (0.0, 0.0));

        // the flat view is now the reference
        bg.src = flat;
        assert!(bg.dejitter());
        assert_eq!(bg.bad_run, 0);
    }

    #[test]
    fn reference_refreshes_after_st_cnt_frames() {
        let mut bg = BgSubtractor::new(BgParams::default());
        bg.ps.st_cnt = 3;
        for _ in 0..5 {
            bg.src = textured(80, 60, 0, 0);
            assert!(bg.dejitter());
        }
        assert!(bg.have_ref);
        assert_eq!(bg.ref_age, 0);
        assert!(bg.ref_mono == bg.tmp);
    }

    #[test]
    fn kalman_resets_on_step() {
        let mut bg = BgSubtractor::new(BgParams::default());
        let mut img = Image::new(4, 4, 3);
        img.fill(100);
        bg.src = img.clone();
        bg.kalman();
        img.fill(104);
        bg.src = img.clone();
        bg.kalman();
        let v = bg.cur.get_bgr(1, 1)[0];
        assert!(v > 100 && v < 104);
        img.fill(200);
        bg.src = img;
        bg.kalman();
        assert_eq!(bg.cur.get_bgr(1, 1), [200, 200, 200]);
    }
}
