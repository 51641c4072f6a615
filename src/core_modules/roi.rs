// THEORY:
// The `Roi` is the rectangular window every image operation is defined over. It is a
// plain value type (corner plus dimensions) with a small algebra: clipping to an image,
// intersecting with another window, absorbing another window (union bounding box),
// padding, re-centering, scaling and fractional addressing where each side is given as
// a 0..1 fraction of the image.
//
// Key principles:
// 1.  **Never larger than the image**: once clipped, the area of a window can not exceed
//     the area of the image it belongs to. `Image` clips every window it is handed.
// 2.  **Compound operations intersect**: an operation over several images runs over the
//     intersection of all their windows, and nothing outside that window is touched.
// 3.  **Empty is legal**: a window with zero width or height is a valid, empty region.

use serde::{Deserialize, Serialize};

/// A rectangular region of interest: corner (x, y) and size (w, h), in pixels.
/// Row 0 is the bottom of an image, so `y` is the lowest row covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Roi {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl Roi {
    pub fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w: w.max(0), h: h.max(0) }
    }

    /// Window covering a whole image of the given size.
    pub fn full(width: usize, height: usize) -> Self {
        Self::new(0, 0, width as i32, height as i32)
    }

    /// Build a window from inclusive corner coordinates.
    pub fn from_corners(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        let (lx, hx) = if x0 <= x1 { (x0, x1) } else { (x1, x0) };
        let (ly, hy) = if y0 <= y1 { (y0, y1) } else { (y1, y0) };
        Self::new(lx, ly, hx - lx + 1, hy - ly + 1)
    }

    /// One past the rightmost column.
    pub fn x1(&self) -> i32 {
        self.x + self.w
    }

    /// One past the topmost row.
    pub fn y1(&self) -> i32 {
        self.y + self.h
    }

    pub fn area(&self) -> i64 {
        self.w as i64 * self.h as i64
    }

    pub fn is_empty(&self) -> bool {
        self.w <= 0 || self.h <= 0
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.x1() && y >= self.y && y < self.y1()
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x as f64 + 0.5 * self.w as f64, self.y as f64 + 0.5 * self.h as f64)
    }

    /// Copy all four fields from another window.
    pub fn copy(&mut self, src: &Roi) {
        *self = *src;
    }

    /// Restrict the window to an image of the given size.
    pub fn clip(&mut self, width: usize, height: usize) -> &mut Self {
        let x0 = self.x.clamp(0, width as i32);
        let y0 = self.y.clamp(0, height as i32);
        let x1 = self.x1().clamp(0, width as i32);
        let y1 = self.y1().clamp(0, height as i32);
        self.x = x0;
        self.y = y0;
        self.w = (x1 - x0).max(0);
        self.h = (y1 - y0).max(0);
        self
    }

    /// Shrink to the overlap with another window (possibly empty).
    pub fn intersect(&mut self, other: &Roi) -> &mut Self {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.x1().min(other.x1());
        let y1 = self.y1().min(other.y1());
        self.x = x0;
        self.y = y0;
        self.w = (x1 - x0).max(0);
        self.h = (y1 - y0).max(0);
        self
    }

    /// Non-mutating intersection.
    pub fn overlap(&self, other: &Roi) -> Roi {
        let mut r = *self;
        r.intersect(other);
        r
    }

    /// Grow to the bounding box of both windows. An empty window absorbs nothing
    /// and is replaced outright when it is the receiver.
    pub fn absorb(&mut self, other: &Roi) -> &mut Self {
        if other.is_empty() {
            return self;
        }
        if self.is_empty() {
            *self = *other;
            return self;
        }
        let x0 = self.x.min(other.x);
        let y0 = self.y.min(other.y);
        let x1 = self.x1().max(other.x1());
        let y1 = self.y1().max(other.y1());
        self.x = x0;
        self.y = y0;
        self.w = x1 - x0;
        self.h = y1 - y0;
        self
    }

    /// Extend a bounding box by a single pixel.
    pub fn absorb_point(&mut self, x: i32, y: i32) -> &mut Self {
        self.absorb(&Roi::new(x, y, 1, 1))
    }

    /// Grow (or shrink with negative values) by the given margins on every side.
    pub fn pad(&mut self, dx: i32, dy: i32) -> &mut Self {
        self.x -= dx;
        self.y -= dy;
        self.w = (self.w + 2 * dx).max(0);
        self.h = (self.h + 2 * dy).max(0);
        self
    }

    /// Move the window so its middle lands on (cx, cy), keeping its size.
    pub fn set_center(&mut self, cx: f64, cy: f64) -> &mut Self {
        self.x = (cx - 0.5 * self.w as f64).round() as i32;
        self.y = (cy - 0.5 * self.h as f64).round() as i32;
        self
    }

    /// Resize about the current center by factor `f`.
    pub fn scale(&mut self, f: f64) -> &mut Self {
        let (cx, cy) = self.center();
        self.w = (self.w as f64 * f).round().max(0.0) as i32;
        self.h = (self.h as f64 * f).round().max(0.0) as i32;
        self.set_center(cx, cy)
    }

    /// Set the window from side fractions of an image: left and right edges as fractions
    /// of the width, bottom and top edges as fractions of the height.
    pub fn set_fractions(
        &mut self,
        left: f64,
        right: f64,
        bottom: f64,
        top: f64,
        width: usize,
        height: usize,
    ) -> &mut Self {
        let fx = |f: f64| (f.clamp(0.0, 1.0) * width as f64).round() as i32;
        let fy = |f: f64| (f.clamp(0.0, 1.0) * height as f64).round() as i32;
        let (x0, x1) = (fx(left.min(right)), fx(left.max(right)));
        let (y0, y1) = (fy(bottom.min(top)), fy(bottom.max(top)));
        *self = Roi::new(x0, y0, x1 - x0, y1 - y0);
        self
    }

    /// The window's sides as fractions (left, right, bottom, top) of an image.
    pub fn fractions(&self, width: usize, height: usize) -> (f64, f64, f64, f64) {
        if width == 0 || height == 0 {
            return (0.0, 0.0, 0.0, 0.0);
        }
        let (w, h) = (width as f64, height as f64);
        (
            self.x as f64 / w,
            self.x1() as f64 / w,
            self.y as f64 / h,
            self.y1() as f64 / h,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_never_exceeds_image() {
        let mut r = Roi::new(-10, -5, 1000, 1000);
        r.clip(640, 480);
        assert_eq!(r, Roi::new(0, 0, 640, 480));
        assert!(r.area() <= 640 * 480);
    }

    #[test]
    fn intersect_disjoint_is_empty() {
        let mut a = Roi::new(0, 0, 10, 10);
        a.intersect(&Roi::new(20, 20, 5, 5));
        assert!(a.is_empty());
        assert_eq!(a.area(), 0);
    }

    #[test]
    fn absorb_makes_bounding_box() {
        let mut a = Roi::new(2, 3, 4, 4);
        a.absorb(&Roi::new(10, 0, 2, 2));
        assert_eq!(a, Roi::new(2, 0, 10, 7));

        let mut e = Roi::default();
        e.absorb_point(5, 6);
        assert_eq!(e, Roi::new(5, 6, 1, 1));
    }

    #[test]
    fn pad_and_scale_keep_center() {
        let mut r = Roi::new(10, 10, 20, 10);
        r.pad(5, 5);
        assert_eq!(r, Roi::new(5, 5, 30, 20));
        let (cx, cy) = r.center();
        r.scale(0.5);
        let (nx, ny) = r.center();
        assert!((cx - nx).abs() <= 0.5 && (cy - ny).abs() <= 0.5);
        assert_eq!((r.w, r.h), (15, 10));
    }

    #[test]
    fn fractions_round_trip() {
        let mut r = Roi::default();
        r.set_fractions(0.25, 0.75, 0.0, 0.5, 640, 480);
        assert_eq!(r, Roi::new(160, 0, 320, 240));
        let (l, rt, b, t) = r.fractions(640, 480);
        assert_eq!((l, rt, b, t), (0.25, 0.75, 0.0, 0.5));
    }
}
