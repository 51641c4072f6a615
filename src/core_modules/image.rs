// THEORY:
// The `Image` module is the most fundamental unit of the library. It is a value-typed
// 2D array of pixels with one, two or three byte fields per pixel:
//   • 1 field:  monochrome bytes (masks, overhead height maps, salience)
//   • 2 fields: 16-bit little-endian values (depth in 4 × mm, connected-component labels)
//   • 3 fields: B, G, R byte triples (colour frames, background model)
//
// Rows are padded to a 4-byte boundary. The padding at the end of each row (the "skip")
// belongs to the image and no operation writes into it. Row 0 is the bottom of the
// picture, so world "up" and image "up" agree.
//
// Every image carries a region of interest. Operations read and write only inside the
// window, and operations over several images use the intersection of all windows.
// Scratch images are owned by the component that uses them and are grown on demand with
// `set_size`, which only reallocates when the format actually changes.

use crate::core_modules::roi::Roi;
use crate::error::{Error, Result};

/// Value-typed raster with row padding and a region of interest.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Image {
    width: usize,
    height: usize,
    fields: usize,
    line: usize,
    data: Vec<u8>,
    roi: Roi,
}

impl Image {
    /// Create a zero-filled image. `fields` must be 1, 2 or 3.
    pub fn new(width: usize, height: usize, fields: usize) -> Self {
        let mut img = Self::default();
        img.set_size(width, height, fields);
        img
    }

    /// Create an image with the same dimensions and field count as another.
    pub fn like(other: &Image) -> Self {
        Self::new(other.width, other.height, other.fields)
    }

    /// Bytes per row including the trailing alignment pad.
    pub fn line_for(width: usize, fields: usize) -> usize {
        (width * fields + 3) & !3
    }

    /// Resize in place. Contents are cleared only when the format changes; the ROI
    /// is reset to the full image either way.
    pub fn set_size(&mut self, width: usize, height: usize, fields: usize) -> &mut Self {
        let fields = fields.clamp(1, 3);
        if width != self.width || height != self.height || fields != self.fields {
            self.width = width;
            self.height = height;
            self.fields = fields;
            self.line = Self::line_for(width, fields);
            self.data = vec![0; self.line * height];
        }
        self.roi = Roi::full(width, height);
        self
    }

    /// Match the format of another image.
    pub fn set_size_like(&mut self, other: &Image) -> &mut Self {
        self.set_size(other.width, other.height, other.fields)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn fields(&self) -> usize {
        self.fields
    }

    pub fn line(&self) -> usize {
        self.line
    }

    /// Trailing pad bytes at the end of every row.
    pub fn skip(&self) -> usize {
        self.line - self.width * self.fields
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && !self.data.is_empty()
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    pub fn same_format(&self, other: &Image) -> bool {
        self.width == other.width && self.height == other.height && self.fields == other.fields
    }

    pub fn same_size(&self, other: &Image) -> bool {
        self.width == other.width && self.height == other.height
    }

    /// Return an error unless `other` has identical dimensions and field count.
    pub fn check_format(&self, other: &Image) -> Result<()> {
        if self.same_format(other) {
            Ok(())
        } else {
            log::error!("image format mismatch: {} vs {}", self.describe(), other.describe());
            Err(Error::SizeMismatch { expected: self.describe(), actual: other.describe() })
        }
    }

    /// Return an error unless the field count is the one given.
    pub fn check_fields(&self, fields: usize) -> Result<()> {
        if self.fields == fields && self.is_valid() {
            Ok(())
        } else {
            log::error!("expected {}-field image, got {}", fields, self.describe());
            Err(Error::InvalidInput(format!("expected {} fields, got {}", fields, self.describe())))
        }
    }

    pub fn describe(&self) -> String {
        format!("{}x{}x{}", self.width, self.height, self.fields)
    }

    // --- region of interest ---

    pub fn roi(&self) -> Roi {
        self.roi
    }

    /// Install a window, clipped to the image.
    pub fn set_roi(&mut self, roi: Roi) -> &mut Self {
        let mut r = roi;
        r.clip(self.width, self.height);
        self.roi = r;
        self
    }

    pub fn max_roi(&mut self) -> &mut Self {
        self.roi = Roi::full(self.width, self.height);
        self
    }

    /// Intersection of this image's window with the windows of other images.
    pub fn joint_roi(&self, others: &[&Image]) -> Roi {
        let mut r = self.roi;
        for o in others {
            r.intersect(&o.roi);
        }
        r.clip(self.width, self.height);
        r
    }

    // --- raw access ---

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Pixel bytes of row `y` (without the pad).
    pub fn row(&self, y: usize) -> &[u8] {
        let start = y * self.line;
        &self.data[start..start + self.width * self.fields]
    }

    pub fn row_mut(&mut self, y: usize) -> &mut [u8] {
        let start = y * self.line;
        let len = self.width * self.fields;
        &mut self.data[start..start + len]
    }

    /// Byte offset of a pixel.
    pub fn offset(&self, x: usize, y: usize) -> usize {
        y * self.line + x * self.fields
    }

    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as usize) < self.width && (y as usize) < self.height
    }

    // --- monochrome ---

    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[self.offset(x, y)]
    }

    pub fn set(&mut self, x: usize, y: usize, v: u8) {
        let off = self.offset(x, y);
        self.data[off] = v;
    }

    /// Clipped read: out-of-bounds returns `def`.
    pub fn get_clip(&self, x: i32, y: i32, def: u8) -> u8 {
        if self.in_bounds(x, y) { self.get(x as usize, y as usize) } else { def }
    }

    // --- 16 bit ---

    pub fn get16(&self, x: usize, y: usize) -> u16 {
        let off = self.offset(x, y);
        u16::from_le_bytes([self.data[off], self.data[off + 1]])
    }

    pub fn set16(&mut self, x: usize, y: usize, v: u16) {
        let off = self.offset(x, y);
        self.data[off..off + 2].copy_from_slice(&v.to_le_bytes());
    }

    // --- colour (B, G, R) ---

    pub fn get_bgr(&self, x: usize, y: usize) -> [u8; 3] {
        let off = self.offset(x, y);
        [self.data[off], self.data[off + 1], self.data[off + 2]]
    }

    pub fn set_bgr(&mut self, x: usize, y: usize, bgr: [u8; 3]) {
        let off = self.offset(x, y);
        self.data[off..off + 3].copy_from_slice(&bgr);
    }

    /// Field `f` of pixel (x, y), whatever the field count.
    pub fn field(&self, x: usize, y: usize, f: usize) -> u8 {
        self.data[self.offset(x, y) + f]
    }

    // --- whole-window operations ---

    /// Set every field of every in-window pixel to `v`.
    pub fn fill(&mut self, v: u8) -> &mut Self {
        let r = self.roi;
        self.fill_roi(&r, v)
    }

    /// Set every field of the pixels in `area ∩ ROI` to `v`.
    pub fn fill_roi(&mut self, area: &Roi, v: u8) -> &mut Self {
        let mut r = self.roi;
        r.intersect(area);
        if r.is_empty() {
            return self;
        }
        let f = self.fields;
        for y in r.y as usize..r.y1() as usize {
            let start = self.offset(r.x as usize, y);
            self.data[start..start + r.w as usize * f].fill(v);
        }
        self
    }

    /// Fill the window of a 16-bit image with a value.
    pub fn fill16(&mut self, v: u16) -> &mut Self {
        let r = self.roi;
        for y in r.y as usize..r.y1() as usize {
            for x in r.x as usize..r.x1() as usize {
                self.set16(x, y, v);
            }
        }
        self
    }

    /// Zero everything, including pixels outside the window (but not the row pads).
    pub fn clear_all(&mut self) -> &mut Self {
        let saved = self.roi;
        self.max_roi();
        self.fill(0);
        self.roi = saved;
        self
    }

    /// Copy the pixels of `src` inside the joint window. Formats must match.
    pub fn copy_from(&mut self, src: &Image) -> Result<&mut Self> {
        self.check_format(src)?;
        let r = self.joint_roi(&[src]);
        let f = self.fields;
        for y in r.y as usize..r.y1() as usize {
            let s = src.offset(r.x as usize, y);
            let d = self.offset(r.x as usize, y);
            let n = r.w as usize * f;
            self.data[d..d + n].copy_from_slice(&src.data[s..s + n]);
        }
        Ok(self)
    }

    /// Deep copy that also takes over the format and window of `src`.
    pub fn clone_from_image(&mut self, src: &Image) -> &mut Self {
        self.set_size_like(src);
        self.data.copy_from_slice(&src.data);
        self.roi = src.roi;
        self
    }

    /// Count of in-window pixels whose first field exceeds `th`.
    pub fn count_over(&self, th: u8) -> usize {
        let r = self.roi;
        let mut n = 0;
        for y in r.y as usize..r.y1() as usize {
            for x in r.x as usize..r.x1() as usize {
                if self.data[self.offset(x, y)] > th {
                    n += 1;
                }
            }
        }
        n
    }

    /// Count of in-window 16-bit pixels that are non-zero.
    pub fn count_nonzero16(&self) -> usize {
        let r = self.roi;
        let mut n = 0;
        for y in r.y as usize..r.y1() as usize {
            for x in r.x as usize..r.x1() as usize {
                if self.get16(x, y) != 0 {
                    n += 1;
                }
            }
        }
        n
    }

    /// Weighted monochrome value of a colour pixel (Rec. 601 weights in 1/256 units).
    pub fn mono_at(&self, x: usize, y: usize) -> u8 {
        match self.fields {
            3 => {
                let [b, g, r] = self.get_bgr(x, y);
                ((29 * b as u32 + 150 * g as u32 + 77 * r as u32) >> 8) as u8
            }
            2 => (self.get16(x, y) >> 8) as u8,
            _ => self.get(x, y),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_four_byte_aligned() {
        let img = Image::new(5, 3, 3);
        assert_eq!(img.line(), 16);
        assert_eq!(img.skip(), 1);
        assert_eq!(img.data().len(), 48);

        let mono = Image::new(7, 2, 1);
        assert_eq!(mono.line(), 8);
        let deep = Image::new(3, 2, 2);
        assert_eq!(deep.line(), 8);
        assert_eq!(deep.skip(), 2);
    }

    #[test]
    fn fill_respects_roi_and_skip() {
        let mut img = Image::new(5, 4, 1);
        img.set_roi(Roi::new(1, 1, 2, 2));
        img.fill(9);
        assert_eq!(img.get(0, 0), 0);
        assert_eq!(img.get(1, 1), 9);
        assert_eq!(img.get(2, 2), 9);
        assert_eq!(img.get(3, 2), 0);

        img.max_roi();
        img.fill(7);
        // padding bytes at the end of each row stay untouched
        for y in 0..4 {
            assert_eq!(img.data()[y * img.line() + 5], 0);
        }
    }

    #[test]
    fn sixteen_bit_round_trip() {
        let mut img = Image::new(4, 4, 2);
        img.set16(3, 2, 40000);
        assert_eq!(img.get16(3, 2), 40000);
        assert_eq!(img.count_nonzero16(), 1);
    }

    #[test]
    fn copy_uses_joint_roi() {
        let mut src = Image::new(6, 6, 1);
        src.fill(200);
        src.set_roi(Roi::new(0, 0, 3, 6));
        let mut dst = Image::new(6, 6, 1);
        dst.set_roi(Roi::new(2, 0, 4, 6));
        dst.copy_from(&src).expect("same format");
        assert_eq!(dst.get(1, 0), 0);
        assert_eq!(dst.get(2, 0), 200);
        assert_eq!(dst.get(3, 0), 0);
    }

    #[test]
    fn mismatched_copy_is_an_error() {
        let src = Image::new(6, 6, 1);
        let mut dst = Image::new(6, 5, 1);
        assert!(dst.copy_from(&src).is_err());
    }
}
