// Setting, forcing, saving and loading the background model.
//
// The saved form is a 24-bit BMP of the model at processing resolution. Bytes 6..9 of
// the BMP file header are reserved by the format; the first three hold the quiet-noise
// estimates for R, G and B in tenths of a level.

use std::io::Cursor;
use std::path::Path;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

use super::BgSubtractor;
use crate::core_modules::image::Image;
use crate::core_modules::toolkit;
use crate::error::{Error, Result};

const NOISE_AT: usize = 6;

impl BgSubtractor {
    /// Replace the model with a full-resolution reference frame and trust all of it.
    pub fn set_bg(&mut self, reference: &Image) -> Result<()> {
        reference.check_fields(3)?;
        self.samp = ((reference.height() as f64 / self.ps.hdes as f64).round() as usize).max(1);
        let mut small = Image::default();
        toolkit::sample_down(&mut small, reference, self.samp)?;
        self.install_bg(&small);
        Ok(())
    }

    /// Take the current (stabilized) frame as the background.
    pub fn force_bg(&mut self) -> Result<()> {
        if !self.cur.is_valid() {
            return Err(Error::InvalidInput("force_bg: no frame processed yet".into()));
        }
        let cur = self.cur.clone();
        self.install_bg(&cur);
        Ok(())
    }

    fn install_bg(&mut self, small: &Image) {
        if !self.initialized || !self.bg.same_size(small) {
            self.src.clone_from_image(small);
            self.init_model();
        }
        self.bg.clone_from_image(small);
        self.refresh_bg_derived();
        self.valid.fill(255);
        self.quiet.iter_mut().for_each(|q| *q = 0);
        self.heals.clear();
        self.heal_mask.clear_all();
        self.since_reset = self.ps.bcnt;
    }

    /// Write the model and its noise estimate to a BMP file.
    pub fn save_bg<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if !self.initialized {
            return Err(Error::InvalidInput("save_bg: no background model".into()));
        }
        let (w, h) = (self.bg.width(), self.bg.height());
        let mut rgb = RgbImage::new(w as u32, h as u32);
        for (x, y, px) in rgb.enumerate_pixels_mut() {
            let [b, g, r] = self.bg.get_bgr(x as usize, h - 1 - y as usize);
            *px = Rgb([r, g, b]);
        }
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(rgb).write_to(&mut Cursor::new(&mut bytes), ImageFormat::Bmp)?;
        for (k, c) in [2, 1, 0].into_iter().enumerate() {
            bytes[NOISE_AT + k] = (self.noise[c] * 10.0).round().clamp(0.0, 255.0) as u8;
        }
        std::fs::write(path.as_ref(), &bytes)?;
        log::info!("background: saved {}x{} model to {}", w, h, path.as_ref().display());
        Ok(())
    }

    /// Restore a model written by `save_bg`. On any failure the current model is left
    /// untouched: `Error::Io` when the file cannot be read, `Error::Format` when it is
    /// not a BMP or does not match the model size.
    pub fn load_bg<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let bytes = std::fs::read(path.as_ref())?;
        if bytes.len() < 54 || &bytes[..2] != b"BM" {
            return Err(Error::Format(format!("{} is not a BMP file", path.as_ref().display())));
        }
        let rgb = image::load_from_memory_with_format(&bytes, ImageFormat::Bmp)
            .map_err(|e| Error::Format(e.to_string()))?
            .to_rgb8();
        let (w, h) = (rgb.width() as usize, rgb.height() as usize);
        if self.initialized && (w != self.bg.width() || h != self.bg.height()) {
            return Err(Error::Format(format!(
                "saved model is {}x{}, current model is {}x{}",
                w,
                h,
                self.bg.width(),
                self.bg.height()
            )));
        }
        let mut small = Image::new(w, h, 3);
        for (x, y, px) in rgb.enumerate_pixels() {
            let [r, g, b] = px.0;
            small.set_bgr(x as usize, h - 1 - y as usize, [b, g, r]);
        }
        self.install_bg(&small);
        for (k, c) in [2, 1, 0].into_iter().enumerate() {
            let v = bytes[NOISE_AT + k];
            if v > 0 {
                self.noise[c] = v as f64 / 10.0;
            }
        }
        log::info!("background: loaded {}x{} model from {}", w, h, path.as_ref().display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::background::tests::{scene, Lcg};
    use crate::core_modules::background::BgStatus;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("depth_scene_{}_{}.bmp", name, std::process::id()))
    }

    #[test]
    fn save_then_load_matches_set() {
        let mut rng = Lcg(5);
        let frame = scene(&mut rng, None);
        let mut a = BgSubtractor::default();
        a.set_bg(&frame).unwrap();
        assert_eq!(a.status(), BgStatus::Ready);
        let path = temp_path("roundtrip");
        a.save_bg(&path).unwrap();

        let mut b = BgSubtractor::default();
        b.load_bg(&path).unwrap();
        assert_eq!(a.background(), b.background());
        for k in 0..3 {
            assert!((a.noise()[k] - b.noise()[k]).abs() <= 0.05);
        }
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn failed_load_leaves_model() {
        let mut rng = Lcg(9);
        let mut a = BgSubtractor::default();
        a.set_bg(&scene(&mut rng, None)).unwrap();
        let before = a.background().clone();
        assert!(matches!(a.load_bg(temp_path("missing")), Err(Error::Io(_))));

        let junk = temp_path("junk");
        std::fs::write(&junk, b"not an image at all").unwrap();
        assert!(matches!(a.load_bg(&junk), Err(Error::Format(_))));

        let small = temp_path("small");
        let mut other = BgSubtractor::default();
        other.set_bg(&Image::new(64, 48, 3)).unwrap();
        other.save_bg(&small).unwrap();
        assert!(matches!(a.load_bg(&small), Err(Error::Format(_))));

        assert_eq!(a.background(), &before);
        let _ = std::fs::remove_file(&junk);
        let _ = std::fs::remove_file(&small);
    }
}
