// Salience to mask: threshold, close small gaps, trim ragged edges, drop specks,
// optionally convexify, fill holes, and drop components that are small next to the
// biggest one.

use super::{BgSubtractor, FG};
use crate::core_modules::image::Image;
use crate::core_modules::toolkit;
use crate::error::Result;

impl BgSubtractor {
    /// Build the foreground mask and its labels from the salience image. Returns the
    /// number of foreground pixels.
    pub(super) fn cleanup(&mut self) -> Result<usize> {
        let (w, h) = (self.sal.width(), self.sal.height());
        self.tmp.set_size(w, h, 1);
        self.tmp2.set_size(w, h, 1);
        self.mask.set_size(w, h, 1);
        toolkit::threshold(&mut self.tmp, &self.sal, self.ps.pass)?;
        if self.ps.mfill > 0 {
            toolkit::close(&mut self.tmp2, &self.tmp, 2 * self.ps.mfill + 1)?;
        } else {
            self.tmp2.copy_from(&self.tmp)?;
        }
        if self.ps.mtrim > 0 {
            toolkit::box_min(&mut self.tmp, &self.tmp2, 2 * self.ps.mtrim + 1)?;
        } else {
            self.tmp.copy_from(&self.tmp2)?;
        }

        let n = toolkit::label_components(&mut self.labels, &self.tmp, 0)?;
        self.blobs.find_bbox(&self.labels, n)?;
        let amin = (self.ps.amin * self.ps.amin * (w * h) as f64).round() as i64;
        self.blobs.area_thresh(amin.max(1), 0);
        self.blobs.mark_valid(&mut self.mask, &self.labels, FG)?;
        let Some(big) = self.blobs.biggest().map(|i| self.blobs.pixels(i)) else {
            self.labels.clear_all();
            return Ok(0);
        };

        if self.ps.cvx > 0 {
            convexify(&mut self.mask, &self.labels, self.ps.cvx);
        }
        let hole = (self.ps.hfrac * big as f64).round() as usize;
        if hole > 0 {
            toolkit::fill_holes(&mut self.mask, hole)?;
        }

        // final labels, without the stragglers
        let n = toolkit::label_components(&mut self.labels, &self.mask, 0)?;
        self.blobs.find_bbox(&self.labels, n)?;
        let floor = (self.ps.afrac * big as f64).round() as i64;
        self.blobs.area_thresh(floor.max(1), 0);
        self.blobs.mark_valid(&mut self.mask, &self.labels, FG)?;
        let kept: usize = self.blobs.valid_ids().map(|i| self.blobs.pixels(i) as usize).sum();
        for y in 0..h {
            for x in 0..w {
                if self.mask.get(x, y) == 0 {
                    self.labels.set16(x, y, 0);
                }
            }
        }
        Ok(kept)
    }
}

/// Fill each component's row and column spans that are at most `gap` pixels wide, so
/// concave bites and slits close up.
fn convexify(mask: &mut Image, labels: &Image, gap: usize) {
    let (w, h) = (mask.width(), mask.height());
    let span = |mask: &mut Image, pts: &mut dyn Iterator<Item = (usize, usize)>| {
        let mut last: Option<(u16, usize, usize)> = None;
        for (x, y) in pts {
            let lab = labels.get16(x, y);
            if lab == 0 || mask.get(x, y) == 0 {
                continue;
            }
            if let Some((l, px, py)) = last {
                let dist = x.abs_diff(px) + y.abs_diff(py);
                if l == lab && dist > 1 && dist <= gap + 1 {
                    let (x0, x1) = (px.min(x), px.max(x));
                    let (y0, y1) = (py.min(y), py.max(y));
                    for yy in y0..=y1 {
                        for xx in x0..=x1 {
                            mask.set(xx, yy, FG);
                        }
                    }
                }
            }
            last = Some((lab, x, y));
        }
    };
    for y in 0..h {
        span(mask, &mut (0..w).map(move |x| (x, y)));
    }
    for x in 0..w {
        span(mask, &mut (0..h).map(move |y| (x, y)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::background::BgParams;
    use crate::core_modules::roi::Roi;

    fn with_salience(ps: BgParams, sal: Image) -> BgSubtractor {
        let mut bg = BgSubtractor::new(ps);
        bg.sal = sal;
        bg
    }

    #[test]
    fn specks_dropped_and_holes_filled() {
        let mut sal = Image::new(80, 60, 1);
        sal.fill_roi(&Roi::new(20, 20, 20, 16), 200);
        sal.fill_roi(&Roi::new(28, 26, 3, 3), 0);
        sal.set(70, 50, 255);
        let mut bg = with_salience(BgParams::default(), sal);
        let n = bg.cleanup().unwrap();
        let m = bg.mask();
        assert_eq!(m.get(29, 27), FG);
        assert_eq!(m.get(70, 50), 0);
        assert!(n > 200 && n <= 20 * 16, "{}", n);
        assert!(bg.labels().get16(25, 25) > 0);
        assert_eq!(bg.labels().get16(5, 5), 0);
    }

    #[test]
    fn convexify_closes_slit() {
        let mut mask = Image::new(20, 10, 1);
        let mut labels = Image::new(20, 10, 2);
        for y in 2..8 {
            for x in 2..18 {
                if x == 9 || x == 10 {
                    continue;
                }
                mask.set(x, y, FG);
            }
        }
        // one component joined along the bottom row
        for x in 2..18 {
            mask.set(x, 1, FG);
        }
        toolkit::label_components(&mut labels, &mask, 0).unwrap();
        convexify(&mut mask, &labels, 3);
        assert_eq!(mask.get(9, 5), FG);
        assert_eq!(mask.get(0, 5), 0);
    }
}
