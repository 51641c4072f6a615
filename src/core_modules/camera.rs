// THEORY:
// A `CameraRecord` is everything the overhead projector knows about one depth sensor:
// where it sits, which way it looks, how far its readings can be trusted, and an
// optional image-space polygon that restricts plane estimation to a known patch of
// floor. Records are plain serde values so a whole rig can be written to JSON.
//
// Frames: camera x right, y forward along the optical axis, z up. The world frame is
// x right, y ahead, z up from the floor. Camera to world is Rz(pan)·Rx(tilt)·Ry(roll)
// followed by the camera position. Tilt is the elevation of the optical axis, so a
// camera pointing at the floor has a negative tilt.

use nalgebra::{Matrix3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

use crate::core_modules::roi::Roi;

/// Extrinsics and bookkeeping for one depth sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraRecord {
    /// Position in inches (x, y, z).
    pub pos: [f64; 3],
    /// Heading of the optical axis in degrees (counter-clockwise from world +y).
    pub pan: f64,
    pub tilt: f64,
    pub roll: f64,
    /// Readings farther than this many inches are ignored.
    pub range: f64,
    /// Device index, negative when the slot is empty.
    pub dev: i32,
    /// Four image corners bounding the floor patch used for pose estimation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poly: Option<[[f64; 2]; 4]>,
    #[serde(skip)]
    pub used: bool,
}

impl Default for CameraRecord {
    fn default() -> Self {
        Self {
            pos: [0.0, 0.0, 48.0],
            pan: 0.0,
            tilt: 0.0,
            roll: 0.0,
            range: 144.0,
            dev: -1,
            poly: None,
            used: false,
        }
    }
}

impl CameraRecord {
    pub fn new(dev: i32, pos: [f64; 3], pan: f64, tilt: f64, roll: f64) -> Self {
        Self { pos, pan, tilt, roll, dev, ..Self::default() }
    }

    pub fn is_present(&self) -> bool {
        self.dev >= 0
    }

    /// Rotation taking camera-frame vectors into the world frame.
    pub fn rotation(&self) -> Matrix3<f64> {
        let rz = Rotation3::from_axis_angle(&Vector3::z_axis(), self.pan.to_radians());
        let rx = Rotation3::from_axis_angle(&Vector3::x_axis(), self.tilt.to_radians());
        let ry = Rotation3::from_axis_angle(&Vector3::y_axis(), self.roll.to_radians());
        (rz * rx * ry).into_inner()
    }

    pub fn position(&self) -> Vector3<f64> {
        Vector3::new(self.pos[0], self.pos[1], self.pos[2])
    }

    pub fn to_world(&self, cam: &Vector3<f64>) -> Vector3<f64> {
        self.rotation() * cam + self.position()
    }

    pub fn to_camera(&self, world: &Vector3<f64>) -> Vector3<f64> {
        self.rotation().transpose() * (world - self.position())
    }

    /// Roll rounded to the nearest quarter turn, in quarter turns (0..4).
    pub fn roll_quadrant(&self) -> i32 {
        ((self.roll / 90.0).round() as i32).rem_euclid(4)
    }

    /// Image window bounding the plane-estimation polygon, if any.
    pub fn poly_bounds(&self) -> Option<Roi> {
        let p = self.poly?;
        let mut r = Roi::default();
        for [x, y] in p {
            r.absorb_point(x.round() as i32, y.round() as i32);
        }
        Some(r)
    }

    /// True when image point (x, y) lies inside the polygon (or there is none).
    pub fn in_poly(&self, x: f64, y: f64) -> bool {
        let Some(p) = self.poly else {
            return true;
        };
        let mut inside = false;
        let mut j = 3;
        for i in 0..4 {
            let (xi, yi) = (p[i][0], p[i][1]);
            let (xj, yj) = (p[j][0], p[j][1]);
            if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
                inside = !inside;
            }
            j = i;
        }
        inside
    }
}

/// Intrinsic model shared by all depth sensors of a rig.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Optics {
    pub width: usize,
    pub height: usize,
    /// Focal length in pixels.
    pub focal: f64,
    /// Inches per raw depth unit.
    pub scale: f64,
}

impl Default for Optics {
    fn default() -> Self {
        Self { width: 640, height: 480, focal: 525.0, scale: 1.0 / (4.0 * 25.4) }
    }
}

impl Optics {
    /// Configure from a source size and nominal focal length. Tall (second generation)
    /// sensors have a narrower depth field, so their horizontal field of view is cut to
    /// 78% and the focal length re-derived from it.
    pub fn from_source(width: usize, height: usize, focal: f64, scale: f64) -> Self {
        let half = 0.5 * width as f64;
        let mut hfov = 2.0 * (half / focal).atan();
        if height > 500 {
            hfov *= 0.78;
        }
        Self { width, height, focal: half / (0.5 * hfov).tan(), scale }
    }

    /// Horizontal and vertical fields of view in degrees, swapped for sideways mounts.
    pub fn fov(&self, sideways: bool) -> (f64, f64) {
        let h = 2.0 * (0.5 * self.width as f64 / self.focal).atan().to_degrees();
        let v = 2.0 * (0.5 * self.height as f64 / self.focal).atan().to_degrees();
        if sideways { (v, h) } else { (h, v) }
    }

    /// Camera-frame point for pixel (u, v) with raw depth `d`.
    pub fn point(&self, u: f64, v: f64, d: u16) -> Vector3<f64> {
        let y = d as f64 * self.scale;
        let cu = 0.5 * (self.width as f64 - 1.0);
        let cv = 0.5 * (self.height as f64 - 1.0);
        Vector3::new((u - cu) * y / self.focal, y, (v - cv) * y / self.focal)
    }

    /// Pixel location of a camera-frame point (None when behind the camera).
    pub fn project(&self, p: &Vector3<f64>) -> Option<(f64, f64)> {
        if p.y <= 0.0 {
            return None;
        }
        let cu = 0.5 * (self.width as f64 - 1.0);
        let cv = 0.5 * (self.height as f64 - 1.0);
        Some((cu + self.focal * p.x / p.y, cv + self.focal * p.z / p.y))
    }
}

/// Size and placement of the overhead map in the world.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapGeometry {
    /// World width and depth covered, in inches.
    pub mw: f64,
    pub mh: f64,
    /// Inches per map pixel.
    pub ipp: f64,
    /// World coordinates of the map center.
    pub x0: f64,
    pub y0: f64,
}

impl Default for MapGeometry {
    fn default() -> Self {
        Self { mw: 192.0, mh: 192.0, ipp: 0.5, x0: 0.0, y0: 96.0 }
    }
}

impl MapGeometry {
    pub fn width(&self) -> usize {
        (self.mw / self.ipp).round().max(1.0) as usize
    }

    pub fn height(&self) -> usize {
        (self.mh / self.ipp).round().max(1.0) as usize
    }

    /// Fractional map column and row of a world point.
    pub fn to_map(&self, wx: f64, wy: f64) -> (f64, f64) {
        (
            (wx - (self.x0 - 0.5 * self.mw)) / self.ipp,
            (wy - (self.y0 - 0.5 * self.mh)) / self.ipp,
        )
    }

    /// World location of the middle of map cell (i, j).
    pub fn to_world(&self, i: f64, j: f64) -> (f64, f64) {
        (
            self.x0 - 0.5 * self.mw + (i + 0.5) * self.ipp,
            self.y0 - 0.5 * self.mh + (j + 0.5) * self.ipp,
        )
    }

    /// Map cell holding a world point, if it is on the map.
    pub fn cell(&self, wx: f64, wy: f64) -> Option<(usize, usize)> {
        let (i, j) = self.to_map(wx, wy);
        if i < 0.0 || j < 0.0 {
            return None;
        }
        let (i, j) = (i as usize, j as usize);
        (i < self.width() && j < self.height()).then_some((i, j))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn down_looking_camera_maps_axis_to_floor() {
        let cam = CameraRecord::new(0, [10.0, 20.0, 100.0], 0.0, -90.0, 0.0);
        let hit = cam.to_world(&Vector3::new(0.0, 100.0, 0.0));
        assert!((hit - Vector3::new(10.0, 20.0, 0.0)).norm() < 1e-9);
        let back = cam.to_camera(&hit);
        assert!((back - Vector3::new(0.0, 100.0, 0.0)).norm() < 1e-9);
    }

    #[test]
    fn world_up_matches_tilt_and_roll() {
        let cam = CameraRecord::new(0, [0.0, 0.0, 40.0], 0.0, 5.0, 2.0);
        let up = cam.rotation().transpose() * Vector3::z();
        let (t, r) = (5f64.to_radians(), 2f64.to_radians());
        let expect = Vector3::new(-r.sin() * t.cos(), t.sin(), r.cos() * t.cos());
        assert!((up - expect).norm() < 1e-12);
    }

    #[test]
    fn tall_sensor_narrows_field() {
        let std = Optics::from_source(640, 480, 525.0, 0.01);
        assert!((std.focal - 525.0).abs() < 1e-9);
        let tall = Optics::from_source(1280, 960, 1050.0, 0.01);
        let (h, _) = tall.fov(false);
        let (h0, _) = std.fov(false);
        assert!((h - 0.78 * h0).abs() < 1e-6);
        let (sh, sv) = tall.fov(true);
        assert!(sh < sv);
    }

    #[test]
    fn polygon_membership() {
        let mut cam = CameraRecord::default();
        assert!(cam.in_poly(5.0, 5.0));
        cam.poly = Some([[0.0, 0.0], [100.0, 0.0], [100.0, 50.0], [0.0, 50.0]]);
        assert!(cam.in_poly(50.0, 25.0));
        assert!(!cam.in_poly(150.0, 25.0));
        assert_eq!(cam.poly_bounds(), Some(Roi::new(0, 0, 101, 51)));
    }

    #[test]
    fn map_cells_round_trip() {
        let g = MapGeometry { mw: 100.0, mh: 50.0, ipp: 1.0, x0: 0.0, y0: 25.0 };
        assert_eq!((g.width(), g.height()), (100, 50));
        assert_eq!(g.cell(-50.0, 0.0), Some((0, 0)));
        assert_eq!(g.cell(49.5, 49.5), Some((99, 49)));
        assert_eq!(g.cell(50.5, 10.0), None);
        let (wx, wy) = g.to_world(0.0, 0.0);
        assert_eq!((wx, wy), (-49.5, 0.5));
    }
}
