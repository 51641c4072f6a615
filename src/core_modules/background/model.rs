// Background model upkeep: initialization, validity, quiet counters, blending, noise
// learning and healing of stationary foreground.

use super::{BgSubtractor, HealProposal, FG, RED, VALID};
use crate::core_modules::image::Image;
use crate::core_modules::toolkit;

impl BgSubtractor {
    /// Start a fresh model sized to the current input.
    pub(super) fn init_model(&mut self) {
        let (w, h) = (self.src.width(), self.src.height());
        let n = w * h;
        self.bg.clone_from_image(&self.src);
        self.refresh_bg_derived();
        self.valid.set_size(w, h, 1);
        self.valid.clear_all();
        self.quiet = vec![0; n];
        self.mavg = vec![0.0; n];
        self.kest.clear();
        self.kvar.clear();
        self.edge_e = [vec![0.0; n], vec![0.0; n]];
        self.color_e = [vec![0.0; n], vec![0.0; n]];
        for m in self.mono.iter_mut() {
            *m = Image::default();
        }
        self.mask.set_size(w, h, 1);
        self.mask.clear_all();
        self.prev_fg.set_size(w, h, 1);
        self.prev_fg.clear_all();
        self.heal_mask.set_size(w, h, 1);
        self.heal_mask.clear_all();
        self.heals.clear();
        self.gains = [1.0; 3];
        self.frames = 0;
        self.since_reset = 0;
        self.upset_run = 0;
        self.initialized = true;
        log::info!("background: new model {}x{} (sampling 1/{})", w, h, self.samp);
    }

    /// Recompute the monochrome and edge views of the background.
    pub(super) fn refresh_bg_derived(&mut self) {
        self.bg_mono.set_size(self.bg.width(), self.bg.height(), 1);
        if let Err(e) = toolkit::mono(&mut self.bg_mono, &self.bg)
            .and_then(|()| toolkit::triple_edge(&mut self.bg_edge, &self.bg_mono))
        {
            log::error!("background: derived views not refreshed: {}", e);
            self.bg_edge.clear_all();
        }
    }

    /// Copy the pixels of last frame's unvetoed healing proposals into the background.
    /// Returns the number of proposals absorbed.
    pub(super) fn absorb_heals(&mut self) -> usize {
        if self.heals.is_empty() {
            return 0;
        }
        let mut px = 0;
        for y in 0..self.bg.height() {
            for x in 0..self.bg.width() {
                if self.heal_mask.get(x, y) != 0 {
                    self.bg.set_bgr(x, y, self.cur.get_bgr(x, y));
                    self.valid.set(x, y, 255);
                    px += 1;
                }
            }
        }
        let n = self.heals.len();
        log::info!("background: healed {} region(s), {} pixels", n, px);
        self.heals.clear();
        self.heal_mask.clear_all();
        self.refresh_bg_derived();
        n
    }

    /// Per-pixel bookkeeping after the mask is known.
    pub(super) fn update_model(&mut self) {
        let (w, h) = (self.mask.width(), self.mask.height());
        let still = self.ps.still.min(u16::MAX as usize) as u16;
        let mut changed = false;
        let (mut nsum, mut ncnt) = ([0.0f64; 3], 0usize);

        for y in 0..h {
            for x in 0..w {
                let i = y * w + x;
                let fg = self.mask.get(x, y) != 0;
                let was = self.prev_fg.get(x, y) != 0;
                let m = self.motion.get(x, y);
                self.mavg[i] += self.ps.mrate as f32 * (m as f32 - self.mavg[i]);

                if m >= self.ps.mth || fg != was {
                    self.quiet[i] = 0;
                } else {
                    self.quiet[i] = self.quiet[i].saturating_add(1);
                }

                let v = self.valid.get(x, y);
                if self.quiet[i] >= still {
                    self.valid.set(x, y, 255);
                } else if self.mavg[i] as f64 > self.ps.mbad {
                    self.valid.set(x, y, v.saturating_sub(self.ps.vdec));
                }

                if self.valid.get(x, y) < VALID {
                    // untrusted background follows the scene until it settles
                    self.bg.set_bgr(x, y, self.cur.get_bgr(x, y));
                    changed = true;
                } else if !fg && self.quiet[i] >= still {
                    let (s, c) = (self.src.get_bgr(x, y), self.cur.get_bgr(x, y));
                    for k in 0..3 {
                        nsum[k] += (s[k] as f64 - c[k] as f64).powi(2);
                    }
                    ncnt += 1;
                }
            }
        }

        if self.frames % self.ps.wait == 0 {
            let mix = self.ps.bmix;
            for y in 0..h {
                for x in 0..w {
                    if self.mask.get(x, y) != 0 || self.valid.get(x, y) < VALID {
                        continue;
                    }
                    let (b, c) = (self.bg.get_bgr(x, y), self.cur.get_bgr(x, y));
                    let mut out = [0u8; 3];
                    for k in 0..3 {
                        out[k] = (b[k] as f64 + mix * (c[k] as f64 - b[k] as f64)).round() as u8;
                    }
                    self.bg.set_bgr(x, y, out);
                }
            }
            changed = true;
        }
        if changed {
            self.refresh_bg_derived();
        }

        if ncnt > 0 {
            for k in 0..3 {
                let var = nsum[k] / ncnt as f64;
                let cur = self.noise[k] * self.noise[k];
                self.noise[k] = (cur + self.ps.nmix * (var - cur)).max(0.0).sqrt();
            }
        }

        self.propose_heals();

        for y in 0..h {
            for x in 0..w {
                let v = if self.mask.get(x, y) != 0 { FG } else { 0 };
                self.prev_fg.set(x, y, v);
            }
        }
    }

    /// Mark components that have held perfectly still for `stable` frames.
    fn propose_heals(&mut self) {
        let (w, h) = (self.labels.width(), self.labels.height());
        let n = self.blobs.size();
        if n <= 1 || w == 0 {
            return;
        }
        let mut low = vec![u16::MAX; n];
        for y in 0..h {
            for x in 0..w {
                let lab = self.labels.get16(x, y) as usize;
                if lab > 0 && lab < n {
                    low[lab] = low[lab].min(self.quiet[y * w + x]);
                }
            }
        }
        let stable = self.ps.stable.min(u16::MAX as usize) as u16;
        for id in self.blobs.valid_ids().collect::<Vec<_>>() {
            if low[id] < stable {
                continue;
            }
            let bbox = self.blobs.bbox(id);
            for y in bbox.y as usize..bbox.y1() as usize {
                for x in bbox.x as usize..bbox.x1() as usize {
                    if self.labels.get16(x, y) as usize == id {
                        self.mask.set(x, y, RED);
                        self.heal_mask.set(x, y, 255);
                    }
                }
            }
            let area = self.blobs.pixels(id) as usize;
            log::debug!("background: proposing heal {} ({} pixels)", id, area);
            self.heals.push(HealProposal { id, bbox, area });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::background::tests::{scene, Lcg};

    #[test]
    fn derived_views_follow_background() {
        let mut bg = BgSubtractor::default();
        bg.bg = scene(&mut Lcg(2), None);
        bg.refresh_bg_derived();
        assert!(bg.bg_mono.same_size(&bg.bg));
        assert_eq!(bg.bg_mono.get(100, 100), bg.bg.mono_at(100, 100));
        assert_eq!(bg.bg_edge.fields(), 3);
        assert!(bg.bg_edge.same_size(&bg.bg));

        // a flat background has no edges
        bg.bg.fill(90);
        bg.refresh_bg_derived();
        assert_eq!(bg.bg_edge.get_bgr(320, 240), [128, 128, 128]);
    }
}
