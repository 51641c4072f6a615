// THEORY:
// The `FaceProbe` decides which tracked people are looking at a camera. For every
// confirmed head it projects the head into a colour frame, cuts out a small upright
// patch around it (the "probe") and hands the patch to an external face detector. A
// frontal face in the probe means the person faces that camera, so their gaze is the
// unit vector from their head toward the camera.
//
// Key principles:
// 1.  **Upright probes**: the patch is rotated so the world's up direction at the head
//     is the patch's up direction, whatever the camera roll or the head's place in the
//     frame. Detectors trained on upright faces then work everywhere.
// 2.  **Detector as a seam**: the face model is outside this crate; it plugs in through
//     the `FaceFinder` trait.
// 3.  **Frame protocol**: `scan_rgb` once per colour camera, then `done_chk` once per
//     frame to turn frontal counts into gaze observations for the tracker.

use nalgebra::Vector3;

use crate::core_modules::camera::{CameraRecord, Optics};
use crate::core_modules::image::Image;
use crate::core_modules::roi::Roi;
use crate::core_modules::toolkit;
use crate::core_modules::tracker::PersonTracker;
use crate::error::Result;
use crate::params::{ParamSet, Tunable};

/// External frontal-face detector.
pub trait FaceFinder {
    /// Boxes of frontal faces in an upright probe image.
    fn frontal(&mut self, probe: &Image) -> Vec<Roi>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeParams {
    /// Probe side in pixels.
    pub psz: usize,
    /// Nominal head diameter (in).
    pub hsz: f64,
    /// Probe side in head diameters.
    pub span: f64,
    /// Drop from the top of the head to the face center (in).
    pub fdrop: f64,
}

impl Default for ProbeParams {
    fn default() -> Self {
        Self { psz: 64, hsz: 8.0, span: 2.0, fdrop: 4.0 }
    }
}

impl Tunable for ProbeParams {
    fn params(&self) -> ParamSet {
        let d = Self::default();
        ParamSet::new("probe")
            .int("psz", self.psz as i64, d.psz as i64, "Probe size (pixels)")
            .float("hsz", self.hsz, d.hsz, "Head diameter (in)")
            .float("span", self.span, d.span, "Probe width in heads")
            .float("fdrop", self.fdrop, d.fdrop, "Face center below head top (in)")
    }

    fn set_params(&mut self, ps: &ParamSet) {
        self.psz = ps.usize_or("psz", self.psz).max(8);
        self.hsz = ps.f64_or("hsz", self.hsz);
        self.span = ps.f64_or("span", self.span);
        self.fdrop = ps.f64_or("fdrop", self.fdrop);
    }
}

/// One probe cut this frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Probe {
    /// Tracker slot of the head.
    pub slot: usize,
    pub cam: usize,
    /// Center and rotation used for the crop (colour image pixels, degrees).
    pub cx: f64,
    pub cy: f64,
    pub degs: f64,
    /// Frontal faces found.
    pub faces: usize,
}

/// Rotated head probes and frontal-face bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct FaceProbe {
    pub ps: ProbeParams,
    probes: Vec<Probe>,
    cam_pos: Vec<(usize, Vector3<f64>)>,
    patch: Image,
}

impl FaceProbe {
    pub fn new(ps: ProbeParams) -> Self {
        Self { ps, ..Self::default() }
    }

    /// Probes cut since the last `done_chk`.
    pub fn probes(&self) -> &[Probe] {
        &self.probes
    }

    /// The most recent probe image.
    pub fn patch(&self) -> &Image {
        &self.patch
    }

    /// Cut one probe per confirmed head visible in camera `n`'s colour frame and run the
    /// detector on it. Returns the number of probes containing a frontal face.
    pub fn scan_rgb(
        &mut self,
        color: &Image,
        n: usize,
        cam: &CameraRecord,
        optics: &Optics,
        tracker: &PersonTracker,
        finder: &mut dyn FaceFinder,
    ) -> Result<usize> {
        color.check_fields(3)?;
        let sx = color.width() as f64 / optics.width as f64;
        let sy = color.height() as f64 / optics.height as f64;
        self.cam_pos.retain(|(c, _)| *c != n);
        self.cam_pos.push((n, cam.position()));
        let mut found = 0;
        for (slot, b) in tracker.slots().iter().enumerate() {
            if !b.is_tracked() {
                continue;
            }
            let face = Vector3::new(b.pos.x, b.pos.y, b.pos.z - self.ps.fdrop);
            let above = face + Vector3::new(0.0, 0.0, self.ps.hsz);
            let (Some((u0, v0)), Some((u1, v1))) = (
                optics.project(&cam.to_camera(&face)),
                optics.project(&cam.to_camera(&above)),
            ) else {
                continue;
            };
            let (cx, cy) = (u0 * sx, v0 * sy);
            if cx < 0.0 || cy < 0.0 || cx >= color.width() as f64 || cy >= color.height() as f64 {
                continue;
            }
            let (ux, uy) = ((u1 - u0) * sx, (v1 - v0) * sy);
            let head_px = (ux * ux + uy * uy).sqrt();
            if head_px < 1.0 {
                continue;
            }
            let degs = (-ux).atan2(uy).to_degrees();
            let scale = self.ps.span * head_px / self.ps.psz as f64;
            self.patch.set_size(self.ps.psz, self.ps.psz, 3);
            toolkit::rotated_crop(&mut self.patch, color, cx, cy, degs, scale)?;
            let faces = finder.frontal(&self.patch).len();
            if faces > 0 {
                found += 1;
            }
            self.probes.push(Probe { slot, cam: n, cx, cy, degs, faces });
        }
        Ok(found)
    }

    /// Turn this frame's frontal detections into gaze observations and close the frame
    /// for the tracker. Returns the number of people seen frontally.
    pub fn done_chk(&mut self, tracker: &mut PersonTracker) -> usize {
        let mut seen = Vec::new();
        for p in self.probes.iter().filter(|p| p.faces > 0) {
            let Some(b) = tracker.body(p.slot) else {
                continue;
            };
            let Some(&(_, cpos)) = self.cam_pos.iter().find(|(c, _)| *c == p.cam) else {
                continue;
            };
            let to_cam = cpos - b.pos;
            if to_cam.norm() > 1e-6 {
                tracker.add_gaze(p.slot, to_cam.normalize());
                if !seen.contains(&p.slot) {
                    seen.push(p.slot);
                }
            }
        }
        tracker.finish_gaze();
        self.probes.clear();
        seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::person_finder::RawPerson;

    /// Reports a face whenever the middle of the probe is bright.
    struct BrightCenter;

    impl FaceFinder for BrightCenter {
        fn frontal(&mut self, probe: &Image) -> Vec<Roi> {
            let (w, h) = (probe.width(), probe.height());
            if probe.mono_at(w / 2, h / 2) > 200 {
                vec![Roi::new(w as i32 / 4, h as i32 / 4, w as i32 / 2, h as i32 / 2)]
            } else {
                Vec::new()
            }
        }
    }

    #[test]
    fn frontal_faces_become_gaze() {
        let mut tracker = PersonTracker::default();
        let det = [RawPerson::at(0.0, 60.0, 64.0)];
        for _ in 0..5 {
            tracker.track_raw(&det);
        }
        let cam = CameraRecord::new(0, [0.0, 0.0, 60.0], 0.0, 0.0, 0.0);
        let optics = Optics::default();
        let mut color = Image::new(640, 480, 3);
        color.fill_roi(&Roi::new(300, 220, 40, 40), 255);
        let mut probe = FaceProbe::default();
        for _ in 0..5 {
            let n = probe.scan_rgb(&color, 0, &cam, &optics, &tracker, &mut BrightCenter).unwrap();
            assert_eq!(n, 1);
            assert!(probe.probes()[0].degs.abs() < 1e-6);
            assert_eq!(probe.done_chk(&mut tracker), 1);
        }
        let b = tracker.body(tracker.track_index(1).unwrap()).unwrap();
        assert!(b.gaze.is_valid());
        let expect = (Vector3::new(0.0, 0.0, 60.0) - b.pos).normalize();
        assert!((b.gaze.dir - expect).norm() < 1e-6);
    }

    #[test]
    fn no_face_no_gaze() {
        let mut tracker = PersonTracker::default();
        for _ in 0..5 {
            tracker.track_raw(&[RawPerson::at(0.0, 60.0, 64.0)]);
        }
        let cam = CameraRecord::new(0, [0.0, 0.0, 60.0], 0.0, 0.0, 0.0);
        let color = Image::new(640, 480, 3);
        let mut probe = FaceProbe::default();
        let n = probe.scan_rgb(&color, 0, &cam, &Optics::default(), &tracker, &mut BrightCenter).unwrap();
        assert_eq!(n, 0);
        assert_eq!(probe.probes().len(), 1);
        assert_eq!(probe.done_chk(&mut tracker), 0);
        assert!(!tracker.body(0).unwrap().gaze.life.is_active());
    }
}
