// THEORY:
// The `BgSubtractor` finds the parts of a colour scene that have changed. It learns
// a background model from the frames it is shown and flags as foreground whatever
// disagrees with that model. Like a per-pixel statistical baseline, the model is
// built incrementally: nothing is foreground until the background under it has been
// seen holding still.
//
// Key architectural principles:
// 1.  **Stabilize first** (`stabilize.rs`): frames are down-sampled, optionally
//     contrast stretched, aligned against a reference to cancel camera jitter, cleaned
//     of NTSC colour leakage, temporally smoothed per pixel and gain corrected.
// 2.  **Three cues** (`salience.rs`): motion, edge change and colour change are each
//     scored in units of the learned sensor noise and summed into one salience byte.
// 3.  **Clean masks** (`cleanup.rs`): salience is thresholded and shaped into solid
//     components; specks and small holes are removed.
// 4.  **Self-maintaining model** (`model.rs`): quiet pixels join the valid background,
//     restless ones leave it, stationary foreground is proposed for healing and then
//     absorbed, and a knocked camera resets everything.
// 5.  **Persistence** (`persist.rs`): the model can be saved and restored with its noise
//     estimate.
//
// Mask values: 0 background, 255 foreground, 128 foreground proposed for healing.

mod cleanup;
mod model;
mod persist;
mod salience;
mod stabilize;

use crate::core_modules::bbox::BBoxTable;
use crate::core_modules::image::Image;
use crate::core_modules::roi::Roi;
use crate::core_modules::toolkit;
use crate::error::Result;
use crate::params::{ParamSet, Tunable};

/// Mask value of ordinary foreground.
pub const FG: u8 = 255;
/// Mask value of foreground proposed for absorption into the background.
pub const RED: u8 = 128;

/// Outcome of one `find_fg` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FgEvent {
    /// The model was thrown away (camera knock, long duplicate run).
    Reset = -2,
    /// At least one healing proposal was absorbed this frame.
    Healed = -1,
    /// Same input as last time; mask unchanged.
    Duplicate = 0,
    Normal = 1,
}

impl FgEvent {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Whether the model has settled since the last reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BgStatus {
    Learning,
    Ready,
}

/// A stationary foreground component awaiting absorption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealProposal {
    pub id: usize,
    pub bbox: Roi,
    pub area: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BgParams {
    // preprocessing
    pub hdes: usize,
    pub mono: bool,
    pub maxdup: usize,
    pub stretch: bool,
    pub plo: f64,
    pub phi: f64,
    pub shys: f64,
    pub dejitter: bool,
    pub xrng: i32,
    pub yrng: i32,
    pub jbad: f64,
    pub jmin: f64,
    pub jrows: bool,
    pub st_cnt: usize,
    pub jreset: usize,
    pub ntsc: bool,
    pub nedge: i32,
    pub f0: f64,
    pub knoise: f64,
    pub kreset: f64,
    pub gain: bool,
    pub gmix: f64,
    // salience
    pub rng: f64,
    pub wm: f64,
    pub we: f64,
    pub wc: f64,
    pub bf: f64,
    pub df: f64,
    pub nfloor: f64,
    pub bord: usize,
    // cleanup
    pub pass: u8,
    pub mfill: usize,
    pub mtrim: usize,
    pub amin: f64,
    pub cvx: usize,
    pub hfrac: f64,
    pub afrac: f64,
    // model
    pub maxfg: f64,
    pub still: usize,
    pub stable: usize,
    pub bcnt: usize,
    pub wait: usize,
    pub bmix: f64,
    pub mth: u8,
    pub mrate: f64,
    pub mbad: f64,
    pub vdec: u8,
    pub nmix: f64,
}

impl Default for BgParams {
    fn default() -> Self {
        Self {
            hdes: 120,
            mono: false,
            maxdup: 5,
            stretch: false,
            plo: 0.05,
            phi: 0.95,
            shys: 8.0,
            dejitter: true,
            xrng: 4,
            yrng: 4,
            jbad: 20.0,
            jmin: 0.25,
            jrows: false,
            st_cnt: 100,
            jreset: 10,
            ntsc: false,
            nedge: 40,
            f0: 0.1,
            knoise: 4.0,
            kreset: 40.0,
            gain: true,
            gmix: 0.02,
            rng: 3.0,
            wm: 1.0,
            we: 1.0,
            wc: 1.0,
            bf: 0.5,
            df: 2.0,
            nfloor: 2.0,
            bord: 2,
            pass: 150,
            mfill: 2,
            mtrim: 1,
            amin: 0.05,
            cvx: 0,
            hfrac: 0.5,
            afrac: 0.1,
            maxfg: 0.5,
            still: 30,
            stable: 150,
            bcnt: 30,
            wait: 10,
            bmix: 0.1,
            mth: 64,
            mrate: 0.05,
            mbad: 64.0,
            vdec: 8,
            nmix: 0.05,
        }
    }
}

impl Tunable for BgParams {
    fn params(&self) -> ParamSet {
        let d = Self::default();
        ParamSet::new("bg")
            .int("hdes", self.hdes as i64, d.hdes as i64, "Processing height (pixels)")
            .int("mono", self.mono as i64, d.mono as i64, "Force monochrome")
            .int("maxdup", self.maxdup as i64, d.maxdup as i64, "Duplicates before reset")
            .int("stretch", self.stretch as i64, d.stretch as i64, "Contrast stretch")
            .float("plo", self.plo, d.plo, "Stretch low percentile")
            .float("phi", self.phi, d.phi, "Stretch high percentile")
            .float("shys", self.shys, d.shys, "Stretch hysteresis (levels)")
            .int("dejitter", self.dejitter as i64, d.dejitter as i64, "Align to reference")
            .int("xrng", self.xrng as i64, d.xrng as i64, "Max horizontal shift")
            .int("yrng", self.yrng as i64, d.yrng as i64, "Max vertical shift")
            .float("jbad", self.jbad, d.jbad, "Max mean residual for a shift")
            .float("jmin", self.jmin, d.jmin, "Ignore shifts smaller than this")
            .int("jrows", self.jrows as i64, d.jrows as i64, "Per-row tear correction")
            .int("st_cnt", self.st_cnt as i64, d.st_cnt as i64, "Frames between reference refresh")
            .int("jreset", self.jreset as i64, d.jreset as i64, "Failed alignments before a new reference")
            .int("ntsc", self.ntsc as i64, d.ntsc as i64, "Suppress chroma at edges")
            .int("nedge", self.nedge as i64, d.nedge as i64, "Edge strength for chroma fix")
            .float("f0", self.f0, d.f0, "Min temporal filter gain")
            .float("knoise", self.knoise, d.knoise, "Measurement noise (levels)")
            .float("kreset", self.kreset, d.kreset, "Innovation forcing filter reset")
            .int("gain", self.gain as i64, d.gain as i64, "Gain compensation")
            .float("gmix", self.gmix, d.gmix, "Gain update rate")
            .float("rng", self.rng, d.rng, "Sigmas spanning full salience")
            .float("wm", self.wm, d.wm, "Motion weight")
            .float("we", self.we, d.we, "Edge change weight")
            .float("wc", self.wc, d.wc, "Colour change weight")
            .float("bf", self.bf, d.bf, "Min shadow gain")
            .float("df", self.df, d.df, "Max shadow gain")
            .float("nfloor", self.nfloor, d.nfloor, "Min noise estimate (levels)")
            .int("bord", self.bord as i64, d.bord as i64, "Zeroed border (pixels)")
            .int("pass", self.pass as i64, d.pass as i64, "Salience threshold")
            .int("mfill", self.mfill as i64, d.mfill as i64, "Gap closing radius")
            .int("mtrim", self.mtrim as i64, d.mtrim as i64, "Erosion radius")
            .float("amin", self.amin, d.amin, "Min component side fraction")
            .int("cvx", self.cvx as i64, d.cvx as i64, "Max slit closed by convexify (0 = off)")
            .float("hfrac", self.hfrac, d.hfrac, "Hole fill fraction of biggest")
            .float("afrac", self.afrac, d.afrac, "Min component fraction of biggest")
            .float("maxfg", self.maxfg, d.maxfg, "Foreground fraction for knock")
            .int("still", self.still as i64, d.still as i64, "Quiet frames to validate")
            .int("stable", self.stable as i64, d.stable as i64, "Quiet frames to heal")
            .int("bcnt", self.bcnt as i64, d.bcnt as i64, "Frames before model is ready")
            .int("wait", self.wait as i64, d.wait as i64, "Frames between blends")
            .float("bmix", self.bmix, d.bmix, "Background blend rate")
            .int("mth", self.mth as i64, d.mth as i64, "Motion salience for restless")
            .float("mrate", self.mrate, d.mrate, "Motion average rate")
            .float("mbad", self.mbad, d.mbad, "Motion average invalidating pixel")
            .int("vdec", self.vdec as i64, d.vdec as i64, "Validity decay step")
            .float("nmix", self.nmix, d.nmix, "Noise estimate update rate")
    }

    fn set_params(&mut self, ps: &ParamSet) {
        let flag = |k: &str, cur: bool| ps.i64_or(k, cur as i64) != 0;
        let byte = |k: &str, cur: u8| ps.i64_or(k, cur as i64).clamp(0, 255) as u8;
        self.hdes = ps.usize_or("hdes", self.hdes).max(8);
        self.mono = flag("mono", self.mono);
        self.maxdup = ps.usize_or("maxdup", self.maxdup);
        self.stretch = flag("stretch", self.stretch);
        self.plo = ps.f64_or("plo", self.plo);
        self.phi = ps.f64_or("phi", self.phi);
        self.shys = ps.f64_or("shys", self.shys);
        self.dejitter = flag("dejitter", self.dejitter);
        self.xrng = ps.i64_or("xrng", self.xrng as i64) as i32;
        self.yrng = ps.i64_or("yrng", self.yrng as i64) as i32;
        self.jbad = ps.f64_or("jbad", self.jbad);
        self.jmin = ps.f64_or("jmin", self.jmin);
        self.jrows = flag("jrows", self.jrows);
        self.st_cnt = ps.usize_or("st_cnt", self.st_cnt);
        self.jreset = ps.usize_or("jreset", self.jreset);
        self.ntsc = flag("ntsc", self.ntsc);
        self.nedge = ps.i64_or("nedge", self.nedge as i64) as i32;
        self.f0 = ps.f64_or("f0", self.f0);
        self.knoise = ps.f64_or("knoise", self.knoise);
        self.kreset = ps.f64_or("kreset", self.kreset);
        self.gain = flag("gain", self.gain);
        self.gmix = ps.f64_or("gmix", self.gmix);
        self.rng = ps.f64_or("rng", self.rng).max(0.1);
        self.wm = ps.f64_or("wm", self.wm);
        self.we = ps.f64_or("we", self.we);
        self.wc = ps.f64_or("wc", self.wc);
        self.bf = ps.f64_or("bf", self.bf);
        self.df = ps.f64_or("df", self.df);
        self.nfloor = ps.f64_or("nfloor", self.nfloor).max(0.1);
        self.bord = ps.usize_or("bord", self.bord);
        self.pass = byte("pass", self.pass);
        self.mfill = ps.usize_or("mfill", self.mfill);
        self.mtrim = ps.usize_or("mtrim", self.mtrim);
        self.amin = ps.f64_or("amin", self.amin);
        self.cvx = ps.usize_or("cvx", self.cvx);
        self.hfrac = ps.f64_or("hfrac", self.hfrac);
        self.afrac = ps.f64_or("afrac", self.afrac);
        self.maxfg = ps.f64_or("maxfg", self.maxfg);
        self.still = ps.usize_or("still", self.still);
        self.stable = ps.usize_or("stable", self.stable);
        self.bcnt = ps.usize_or("bcnt", self.bcnt);
        self.wait = ps.usize_or("wait", self.wait).max(1);
        self.bmix = ps.f64_or("bmix", self.bmix);
        self.mth = byte("mth", self.mth);
        self.mrate = ps.f64_or("mrate", self.mrate);
        self.mbad = ps.f64_or("mbad", self.mbad);
        self.vdec = byte("vdec", self.vdec);
        self.nmix = ps.f64_or("nmix", self.nmix);
    }
}

/// Per-pixel validity at or above which the background is trusted.
pub(crate) const VALID: u8 = 128;

/// Multi-cue background subtractor with healing and knock detection.
#[derive(Debug, Clone)]
pub struct BgSubtractor {
    pub ps: BgParams,

    // input side
    samp: usize,
    src: Image,
    last_in: Image,
    dup_run: usize,
    have_last: bool,

    // stabilization
    ref_mono: Image,
    have_ref: bool,
    ref_age: usize,
    bad_run: usize,
    shift: (f64, f64),
    slo: f64,
    shi: f64,
    kest: Vec<f32>,
    kvar: Vec<f32>,
    gains: [f64; 3],
    cur: Image,

    // salience history (two-slot rings indexed by `slot`)
    mono: [Image; 3],
    edge_e: [Vec<f32>; 2],
    color_e: [Vec<f32>; 2],
    slot: usize,
    sal: Image,
    motion: Image,

    // model
    bg: Image,
    bg_mono: Image,
    bg_edge: Image,
    edge: Image,
    valid: Image,
    quiet: Vec<u16>,
    mavg: Vec<f32>,
    noise: [f64; 3],
    frames: usize,
    since_reset: usize,
    upset_run: usize,
    initialized: bool,

    // output
    mask: Image,
    prev_fg: Image,
    labels: Image,
    blobs: BBoxTable,
    heals: Vec<HealProposal>,
    heal_mask: Image,
    tmp: Image,
    tmp2: Image,
}

impl Default for BgSubtractor {
    fn default() -> Self {
        Self::new(BgParams::default())
    }
}

impl BgSubtractor {
    pub fn new(ps: BgParams) -> Self {
        Self {
            ps,
            samp: 1,
            src: Image::default(),
            last_in: Image::default(),
            dup_run: 0,
            have_last: false,
            ref_mono: Image::default(),
            have_ref: false,
            ref_age: 0,
            bad_run: 0,
            shift: (0.0, 0.0),
            slo: 0.0,
            shi: 255.0,
            kest: Vec::new(),
            kvar: Vec::new(),
            gains: [1.0; 3],
            cur: Image::default(),
            mono: [Image::default(), Image::default(), Image::default()],
            edge_e: [Vec::new(), Vec::new()],
            color_e: [Vec::new(), Vec::new()],
            slot: 0,
            sal: Image::default(),
            motion: Image::default(),
            bg: Image::default(),
            bg_mono: Image::default(),
            bg_edge: Image::default(),
            edge: Image::default(),
            valid: Image::default(),
            quiet: Vec::new(),
            mavg: Vec::new(),
            noise: [2.0; 3],
            frames: 0,
            since_reset: 0,
            upset_run: 0,
            initialized: false,
            mask: Image::default(),
            prev_fg: Image::default(),
            labels: Image::default(),
            blobs: BBoxTable::default(),
            heals: Vec::new(),
            heal_mask: Image::default(),
            tmp: Image::default(),
            tmp2: Image::default(),
        }
    }

    /// Process one colour frame. The mask is available from `mask()` afterwards.
    pub fn find_fg(&mut self, now: &Image) -> Result<FgEvent> {
        now.check_fields(3)?;
        self.samp = ((now.height() as f64 / self.ps.hdes as f64).round() as usize).max(1);
        toolkit::sample_down(&mut self.src, now, self.samp)?;
        if self.ps.mono {
            self.force_mono();
        }

        // duplicate frames carry no new information
        if self.have_last && self.src == self.last_in {
            self.dup_run += 1;
            if self.dup_run > self.ps.maxdup {
                log::warn!("background: {} duplicate frames, resetting", self.dup_run);
                self.reset();
                return Ok(FgEvent::Reset);
            }
            return Ok(FgEvent::Duplicate);
        }
        self.dup_run = 0;
        self.last_in.clone_from_image(&self.src);
        self.have_last = true;

        if !self.initialized || !self.bg.same_size(&self.src) {
            self.init_model();
        }

        // stabilize
        if self.ps.stretch {
            self.stretch();
        }
        let aligned = !self.ps.dejitter || self.dejitter();
        if self.ps.ntsc {
            self.ntsc_fix();
        }
        self.kalman();
        if self.ps.gain {
            self.gain_comp();
        }

        // heals proposed last frame go into the model before comparing against it
        let healed = self.absorb_heals();

        self.salience()?;
        let nfg = self.cleanup()?;
        self.frames += 1;

        // knock: a run of frames that are either unaligned or mostly foreground
        let area = self.mask.pixel_count().max(1);
        if !aligned || nfg as f64 > self.ps.maxfg * area as f64 {
            self.upset_run += 1;
        } else {
            self.upset_run = 0;
        }
        if self.upset_run > self.ps.still {
            log::info!(
                "background: knock ({} unsettled frames, {} alignment failures), resetting",
                self.upset_run,
                self.bad_run
            );
            self.reset();
            return Ok(FgEvent::Reset);
        }

        self.update_model();
        self.since_reset += 1;
        Ok(if healed > 0 { FgEvent::Healed } else { FgEvent::Normal })
    }

    /// As `find_fg`, also writing the mask (or its component labels when `cc` is set)
    /// into `out`.
    pub fn find_fg_into(&mut self, now: &Image, out: &mut Image, cc: bool) -> Result<FgEvent> {
        let ev = self.find_fg(now)?;
        if cc {
            out.clone_from_image(&self.labels);
        } else {
            out.clone_from_image(&self.mask);
        }
        Ok(ev)
    }

    fn force_mono(&mut self) {
        for y in 0..self.src.height() {
            for x in 0..self.src.width() {
                let m = self.src.mono_at(x, y);
                self.src.set_bgr(x, y, [m, m, m]);
            }
        }
    }

    /// Throw the model away; the next frame starts learning from scratch.
    pub fn reset(&mut self) {
        self.initialized = false;
        self.have_ref = false;
        self.have_last = false;
        self.dup_run = 0;
        self.bad_run = 0;
        self.upset_run = 0;
        self.since_reset = 0;
        self.heals.clear();
        self.gains = [1.0; 3];
        self.mask.clear_all();
        self.labels.clear_all();
    }

    /// Learning until `bcnt` clean frames have passed since the last reset.
    pub fn status(&self) -> BgStatus {
        if self.initialized && self.since_reset >= self.ps.bcnt {
            BgStatus::Ready
        } else {
            BgStatus::Learning
        }
    }

    /// Foreground mask of the last frame (processing resolution).
    pub fn mask(&self) -> &Image {
        &self.mask
    }

    /// Component labels of the last mask (16 bit).
    pub fn labels(&self) -> &Image {
        &self.labels
    }

    /// Background model (processing resolution, BGR).
    pub fn background(&self) -> &Image {
        &self.bg
    }

    /// Last salience image.
    pub fn salience_map(&self) -> &Image {
        &self.sal
    }

    /// Per-pixel validity of the background.
    pub fn validity(&self) -> &Image {
        &self.valid
    }

    /// Down-sampling factor applied to input frames.
    pub fn sample_factor(&self) -> usize {
        self.samp
    }

    /// Current per-channel quiet-noise estimates (B, G, R).
    pub fn noise(&self) -> [f64; 3] {
        self.noise
    }

    /// Last accepted camera shift (pixels at processing resolution).
    pub fn shift(&self) -> (f64, f64) {
        self.shift
    }

    /// Fraction of the frame that was foreground.
    pub fn fg_fraction(&self) -> f64 {
        let n = self.mask.pixel_count();
        if n == 0 { 0.0 } else { self.mask.count_over(0) as f64 / n as f64 }
    }

    /// Healing proposals raised this frame.
    pub fn heal_list(&self) -> &[HealProposal] {
        &self.heals
    }

    /// Withdraw a healing proposal; its pixels must hold still for another full
    /// `stable` period before being proposed again.
    pub fn veto_heal(&mut self, id: usize) -> bool {
        let Some(k) = self.heals.iter().position(|h| h.id == id) else {
            return false;
        };
        let h = self.heals.remove(k);
        let w = self.labels.width();
        for y in h.bbox.y as usize..h.bbox.y1() as usize {
            for x in h.bbox.x as usize..h.bbox.x1() as usize {
                if self.labels.get16(x, y) as usize == id {
                    self.quiet[y * w + x] = 0;
                    self.heal_mask.set(x, y, 0);
                    self.mask.set(x, y, FG);
                }
            }
        }
        log::debug!("background: heal {} vetoed", id);
        true
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Small deterministic generator for sensor noise.
    pub(crate) struct Lcg(pub u32);

    impl Lcg {
        pub(crate) fn next(&mut self) -> u32 {
            self.0 = self.0.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            self.0 >> 16
        }
    }

    /// Textured 640x480 scene with +/-2 levels of per-pixel noise.
    pub(crate) fn scene(rng: &mut Lcg, paint: Option<(Roi, [u8; 3])>) -> Image {
        let mut img = Image::new(640, 480, 3);
        for y in 0..480 {
            for x in 0..640 {
                let base = (((x / 8) * 37 + (y / 8) * 91) % 160 + 40) as i32;
                let mut px = [base as u8, (base / 2 + 60) as u8, (220 - base) as u8];
                if let Some((r, c)) = paint {
                    if r.contains(x as i32, y as i32) {
                        px = c;
                    }
                }
                for v in &mut px {
                    let n = (rng.next() % 5) as i32 - 2;
                    *v = (*v as i32 + n).clamp(0, 255) as u8;
                }
                img.set_bgr(x, y, px);
            }
        }
        img
    }

    #[test]
    fn duplicate_frames_then_reset() {
        let mut bg = BgSubtractor::default();
        let mut rng = Lcg(7);
        let frame = scene(&mut rng, None);
        assert_eq!(bg.find_fg(&frame).unwrap(), FgEvent::Normal);
        let before = bg.mask().clone();
        for _ in 0..bg.ps.maxdup {
            assert_eq!(bg.find_fg(&frame).unwrap(), FgEvent::Duplicate);
            assert_eq!(bg.mask(), &before);
        }
        assert_eq!(bg.find_fg(&frame).unwrap(), FgEvent::Reset);
        assert_eq!(bg.status(), BgStatus::Learning);
    }

    #[test]
    fn quiet_scene_settles_without_foreground() {
        let mut bg = BgSubtractor::default();
        let mut rng = Lcg(11);
        for _ in 0..40 {
            let ev = bg.find_fg(&scene(&mut rng, None)).unwrap();
            assert_eq!(ev, FgEvent::Normal);
        }
        assert_eq!(bg.status(), BgStatus::Ready);
        assert_eq!(bg.sample_factor(), 4);
        assert_eq!(bg.mask().count_over(0), 0);
        assert!(bg.validity().count_over(VALID - 1) > 160 * 120 / 2);
        // a still camera is never resampled
        let (dx, dy) = bg.shift();
        assert!(dx.abs() < bg.ps.jmin && dy.abs() < bg.ps.jmin, "shift {:?}", bg.shift());
    }

    #[test]
    fn new_object_becomes_foreground() {
        let mut bg = BgSubtractor::default();
        let mut rng = Lcg(3);
        for _ in 0..40 {
            bg.find_fg(&scene(&mut rng, None)).unwrap();
        }
        let obj = Some((Roi::new(200, 160, 160, 120), [250, 250, 250]));
        for _ in 0..3 {
            bg.find_fg(&scene(&mut rng, obj)).unwrap();
        }
        let m = bg.mask();
        assert_eq!(m.get(70, 55), FG);
        assert_eq!(m.get(10, 10), 0);
        let frac = bg.fg_fraction();
        assert!(frac > 0.04 && frac < 0.2, "fraction {}", frac);
    }
}
