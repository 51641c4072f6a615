// Salience: how surprising each pixel is, in units of sensor noise.
//
// Three cues are scored and summed into one byte:
//   motion  squared brightness change, the smaller over the last two frame pairs
//   edge    squared change of the three edge responses against the background's
//   colour  squared colour change against the background after shadow correction
// Edge and colour energies are also min-combined with the previous frame, so a single
// glitch frame never lights up.

use super::{BgSubtractor, VALID};
use crate::core_modules::toolkit;
use crate::error::Result;

impl BgSubtractor {
    pub(super) fn salience(&mut self) -> Result<()> {
        let (w, h) = (self.cur.width(), self.cur.height());
        let n = w * h;
        self.mono.rotate_right(1);
        self.mono[0].set_size(w, h, 1);
        toolkit::mono(&mut self.mono[0], &self.cur)?;
        toolkit::triple_edge(&mut self.edge, &self.mono[0])?;
        self.sal.set_size(w, h, 1);
        self.motion.set_size(w, h, 1);
        self.slot ^= 1;
        let (now, old) = (self.slot, self.slot ^ 1);
        for e in [&mut self.edge_e, &mut self.color_e] {
            for v in e.iter_mut() {
                if v.len() != n {
                    *v = vec![0.0; n];
                }
            }
        }
        let history = self.mono[1].same_size(&self.mono[0]) && self.mono[2].same_size(&self.mono[0]);

        let nm = (self.noise.iter().sum::<f64>() / 3.0).max(self.ps.nfloor);
        let nv = (nm * nm) as f32;
        let k = (255.0 / self.ps.rng) as f32;
        let (wm, we, wc) = (self.ps.wm as f32, self.ps.we as f32, self.ps.wc as f32);
        let (bf, df) = (self.ps.bf as f32, self.ps.df as f32);
        let bord = self.ps.bord;

        for y in 0..h {
            for x in 0..w {
                let i = y * w + x;

                let motion = if history {
                    let m0 = self.mono[0].get(x, y) as f32;
                    let m1 = self.mono[1].get(x, y) as f32;
                    let m2 = self.mono[2].get(x, y) as f32;
                    ((m0 - m1) * (m0 - m1)).min((m1 - m2) * (m1 - m2))
                } else {
                    0.0
                };

                let (e, be) = (self.edge.get_bgr(x, y), self.bg_edge.get_bgr(x, y));
                let ee = (0..3).map(|c| (e[c] as f32 - be[c] as f32).powi(2)).sum::<f32>() / 3.0;

                let (c, b) = (self.cur.get_bgr(x, y), self.bg.get_bgr(x, y));
                let (sc, sb) = (
                    c.iter().map(|&v| v as f32).sum::<f32>(),
                    b.iter().map(|&v| v as f32).sum::<f32>(),
                );
                let g = if sc > 0.0 { sb / sc } else { 1.0 };
                let g = if (bf..=df).contains(&g) { g } else { 1.0 };
                let ce = (0..3).map(|k| (g * c[k] as f32 - b[k] as f32).powi(2)).sum::<f32>() / 3.0;

                self.edge_e[now][i] = ee;
                self.color_e[now][i] = ce;
                let ee = ee.min(self.edge_e[old][i]);
                let ce = ce.min(self.color_e[old][i]);

                let sm = (wm * k * motion / (2.0 * nv)).min(255.0);
                let se = (we * k * ee / (0.25 * nv)).min(255.0);
                let scol = (wc * k * ce / nv).min(255.0);
                self.motion.set(x, y, sm as u8);

                let edge_px = x < bord || y < bord || x + bord >= w || y + bord >= h;
                let s = if edge_px || self.valid.get(x, y) < VALID {
                    0
                } else {
                    (sm + se + scol).min(255.0) as u8
                };
                self.sal.set(x, y, s);
            }
        }
        Ok(())
    }
}
