// THEORY:
// The `pipeline` module is the top-level API for a robot that navigates among people.
// It strings the component modules into one per-frame chain and reduces their outputs
// to the few numbers a motion controller needs: who is around, how far the path ahead
// is clear, and where the person being followed stands.
//
// Frame protocol (all calls synchronous, one frame at a time):
//   begin_frame  ->  add_depth (once per depth sensor)  ->  add_color (any colour
//   sensors)  ->  analyze
// `analyze` runs the stages that need every sensor of the frame: map gap filling,
// people tracking, face probes and the obstacle scan.

use nalgebra::Vector3;

use crate::core_modules::background::{BgParams, BgSubtractor, FgEvent};
use crate::core_modules::camera::CameraRecord;
use crate::core_modules::face_probe::{FaceFinder, FaceProbe, ProbeParams};
use crate::core_modules::image::Image;
use crate::core_modules::overhead::{Overhead, OverheadParams, DEV_ABOVE, DEV_ZERO};
use crate::core_modules::person_finder::FinderParams;
use crate::core_modules::roi::Roi;
use crate::core_modules::tracker::{PersonTracker, TrackerParams};
use crate::error::Result;

/// Configuration for the NavPipeline, allowing for tunable behavior.
#[derive(Debug, Clone)]
pub struct NavConfig {
    pub overhead: OverheadParams,
    pub tracker: TrackerParams,
    pub finder: FinderParams,
    pub probe: ProbeParams,
    pub background: BgParams,
    /// Projection band relative to the table plane (in).
    pub bot: f64,
    pub top: f64,
    /// Map gap filling box size and minimum observed cells.
    pub fill_scale: usize,
    pub fill_pmin: usize,
    /// Re-estimate each depth camera's pose from its own frame before projecting.
    pub self_calibrate: bool,
    /// Map cells used to refit the reference floor plane each frame (None keeps the
    /// table plane, h = 0).
    pub floor_area: Option<Roi>,
    /// Robot position on the map; the robot faces +y.
    pub robot: (f64, f64),
    /// Half width of the travel corridor (in).
    pub corridor: f64,
    /// Height above the floor that blocks the corridor (in).
    pub bump: f64,
    /// Colour camera whose frames feed the background subtractor.
    pub bg_cam: Option<usize>,
}

impl Default for NavConfig {
    fn default() -> Self {
        Self {
            overhead: OverheadParams::default(),
            tracker: TrackerParams::default(),
            finder: FinderParams::default(),
            probe: ProbeParams::default(),
            background: BgParams::default(),
            bot: -2.0,
            top: 84.0,
            fill_scale: 8,
            fill_pmin: 10,
            self_calibrate: false,
            floor_area: None,
            robot: (0.0, 0.0),
            corridor: 12.0,
            bump: 3.0,
            bg_cam: None,
        }
    }
}

/// A confirmed person as reported to the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonReport {
    pub id: i32,
    /// Head position (world x, y, height above table).
    pub pos: Vector3<f64>,
    /// Pointing directions of the tracked hands.
    pub pointing: Vec<Vector3<f64>>,
    /// Smoothed gaze direction when the person has been seen facing a camera.
    pub gaze: Option<Vector3<f64>>,
    pub name: Option<String>,
}

/// Where the followed person stands relative to the robot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FollowTarget {
    pub id: i32,
    /// Degrees off the robot's heading, positive to the left.
    pub heading: f64,
    /// Floor distance (in).
    pub range: f64,
}

/// The output of the navigation pipeline for a single frame.
#[derive(Debug, Clone, PartialEq)]
pub struct NavReport {
    pub frame: u64,
    /// Depth sensors projected this frame.
    pub sensors: usize,
    pub people: Vec<PersonReport>,
    /// Distance ahead to the first blocking cell inside the corridor, if any.
    pub obstacle: Option<f64>,
    pub follow: Option<FollowTarget>,
    /// People seen facing a camera this frame.
    pub frontal: usize,
    /// Background subtractor outcome and foreground fraction, when a colour frame was
    /// supplied for it.
    pub bg_event: Option<FgEvent>,
    pub fg_fraction: f64,
}

impl NavReport {
    /// True when nothing blocks the corridor within `dist` inches.
    pub fn is_clear(&self, dist: f64) -> bool {
        self.obstacle.is_none_or(|d| d > dist)
    }
}

/// All sensor images of one frame.
#[derive(Debug, Clone, Default)]
pub struct FrameSet {
    /// (sensor slot, 16-bit depth image)
    pub depth: Vec<(usize, Image)>,
    /// (sensor slot, BGR colour image)
    pub color: Vec<(usize, Image)>,
}

/// The main, top-level struct for depth-based navigation among people.
pub struct NavPipeline {
    config: NavConfig,
    overhead: Overhead,
    tracker: PersonTracker,
    probe: FaceProbe,
    background: BgSubtractor,
    finder: Option<Box<dyn FaceFinder + Send>>,
    colors: Vec<(usize, Image)>,
    devs: Image,
    frame: u64,
    sensors: usize,
    bg_event: Option<FgEvent>,
    follow_id: Option<i32>,
}

impl NavPipeline {
    pub fn new(config: NavConfig) -> Self {
        Self {
            overhead: Overhead::new(config.overhead.clone()),
            tracker: PersonTracker::new(config.tracker.clone(), config.finder.clone()),
            probe: FaceProbe::new(config.probe.clone()),
            background: BgSubtractor::new(config.background.clone()),
            finder: None,
            colors: Vec::new(),
            devs: Image::default(),
            frame: 0,
            sensors: 0,
            bg_event: None,
            follow_id: None,
            config,
        }
    }

    pub fn config(&self) -> &NavConfig {
        &self.config
    }

    /// Install or replace the external frontal-face detector.
    pub fn set_face_finder(&mut self, finder: Box<dyn FaceFinder + Send>) {
        self.finder = Some(finder);
    }

    /// Calibrate a sensor slot.
    pub fn set_cam(&mut self, n: usize, rec: CameraRecord) -> Result<()> {
        self.overhead.set_cam(n, rec)
    }

    /// Follow a particular track id, or the nearest person when `None`.
    pub fn follow(&mut self, id: Option<i32>) {
        self.follow_id = id;
    }

    pub fn overhead(&self) -> &Overhead {
        &self.overhead
    }

    pub fn overhead_mut(&mut self) -> &mut Overhead {
        &mut self.overhead
    }

    pub fn tracker(&self) -> &PersonTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut PersonTracker {
        &mut self.tracker
    }

    pub fn background(&self) -> &BgSubtractor {
        &self.background
    }

    pub fn background_mut(&mut self) -> &mut BgSubtractor {
        &mut self.background
    }

    /// Start a frame: the next depth frame wipes the map.
    pub fn begin_frame(&mut self) {
        self.overhead.reset();
        self.colors.clear();
        self.sensors = 0;
        self.bg_event = None;
        self.frame += 1;
    }

    /// Project one depth sensor into the frame's map. Returns the points projected.
    pub fn add_depth(&mut self, depth: &Image, n: usize) -> Result<usize> {
        if self.config.self_calibrate {
            self.overhead.est_pose(depth, n)?;
        }
        let cnt = self.overhead.ingest(depth, self.config.bot, self.config.top, n)?;
        self.sensors += 1;
        Ok(cnt)
    }

    /// Supply a colour frame from sensor `n`. It feeds the background subtractor when `n`
    /// is the configured background camera, and the face probes at `analyze`.
    pub fn add_color(&mut self, color: &Image, n: usize) -> Result<()> {
        color.check_fields(3)?;
        if self.config.bg_cam == Some(n) {
            self.bg_event = Some(self.background.find_fg(color)?);
        }
        // kept in sensor orientation; face patches are cut upright from it
        if self.finder.is_some() {
            self.overhead.cam(n)?;
            self.colors.push((n, color.clone()));
        }
        Ok(())
    }

    /// Run the full frame protocol over a frame set.
    pub fn process(&mut self, frame: &FrameSet) -> Result<NavReport> {
        self.begin_frame();
        for (n, depth) in &frame.depth {
            self.add_depth(depth, *n)?;
        }
        for (n, color) in &frame.color {
            self.add_color(color, *n)?;
        }
        self.analyze()
    }

    /// Finish the frame and report.
    pub fn analyze(&mut self) -> Result<NavReport> {
        // Stage 1: Fusion
        if self.sensors > 0 {
            let filled = self.overhead.interpolate(self.config.fill_scale, self.config.fill_pmin);
            log::debug!("nav: frame {} from {} sensors, {} cells filled", self.frame, self.sensors, filled);
            if let Some(area) = self.config.floor_area {
                if self.overhead.fit_map_plane(&area).is_none() {
                    log::warn!("nav: no floor plane in {:?}", area);
                }
            }
        }

        // Stage 2: People
        if self.sensors > 0 {
            self.tracker.track_people(&self.overhead)?;
        }

        // Stage 3: Faces
        let mut frontal = 0;
        if let Some(finder) = self.finder.as_deref_mut() {
            let optics = self.overhead.optics();
            for (n, color) in &self.colors {
                let cam = self.overhead.cam(*n)?;
                self.probe.scan_rgb(color, *n, cam, &optics, &self.tracker, finder)?;
            }
            frontal = self.probe.done_chk(&mut self.tracker);
        }

        // Stage 4: Obstacles
        let obstacle = if self.sensors > 0 { self.scan_corridor()? } else { None };

        // Stage 5: Report
        let people = self.people();
        let follow = self.follow_target();
        let report = NavReport {
            frame: self.frame,
            sensors: self.sensors,
            people,
            obstacle,
            follow,
            frontal,
            bg_event: self.bg_event,
            fg_fraction: if self.bg_event.is_some() { self.background.fg_fraction() } else { 0.0 },
        };
        Ok(report)
    }

    /// Nearest cell ahead of the robot, inside the corridor, standing `bump` or more above
    /// the reference plane.
    fn scan_corridor(&mut self) -> Result<Option<f64>> {
        self.overhead.plane_dev(&mut self.devs, self.overhead.map())?;
        let ps = &self.overhead.ps;
        let rise = (100.0 * self.config.bump / ps.dmax.max(1e-3)).round();
        let th = (DEV_ZERO as f64 + rise).min(DEV_ABOVE as f64) as u8;
        let g = self.overhead.geometry();
        let (rx, ry) = self.config.robot;
        let mut best: Option<f64> = None;
        for j in 0..self.devs.height() {
            for i in 0..self.devs.width() {
                if self.devs.get(i, j) < th {
                    continue;
                }
                let (wx, wy) = g.to_world(i as f64, j as f64);
                let ahead = wy - ry;
                if ahead <= 0.0 || (wx - rx).abs() > self.config.corridor {
                    continue;
                }
                if best.is_none_or(|b| ahead < b) {
                    best = Some(ahead);
                }
            }
        }
        Ok(best)
    }

    fn people(&self) -> Vec<PersonReport> {
        self.tracker
            .slots()
            .iter()
            .filter(|b| b.is_tracked())
            .map(|b| PersonReport {
                id: b.id,
                pos: b.pos,
                pointing: b.hands.iter().filter(|h| h.is_valid()).map(|h| h.dir).collect(),
                gaze: b.gaze.is_valid().then_some(b.gaze.dir),
                name: (!b.tag.is_empty()).then(|| b.tag.clone()),
            })
            .collect()
    }

    fn follow_target(&self) -> Option<FollowTarget> {
        let (rx, ry) = self.config.robot;
        let rel = |p: &Vector3<f64>| (p.x - rx, p.y - ry);
        let tracked = self.tracker.slots().iter().filter(|b| b.is_tracked());
        let body = match self.follow_id {
            Some(id) => self.tracker.slots().iter().find(|b| b.is_tracked() && b.id == id)?,
            None => tracked.min_by(|a, b| {
                let (ax, ay) = rel(&a.pos);
                let (bx, by) = rel(&b.pos);
                ax.hypot(ay).total_cmp(&bx.hypot(by))
            })?,
        };
        let (dx, dy) = rel(&body.pos);
        Some(FollowTarget { id: body.id, heading: (-dx).atan2(dy).to_degrees(), range: dx.hypot(dy) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FOCAL: f64 = 525.0;
    const SCALE: f64 = 101.6;

    /// Overhead camera 100 in above the floor at (0, 60), looking straight down.
    fn down_cam() -> CameraRecord {
        CameraRecord::new(0, [0.0, 60.0, 100.0], 0.0, -90.0, 0.0)
    }

    fn floor_depth() -> Image {
        let mut d = Image::new(640, 480, 2);
        d.fill16((100.0 * SCALE) as u16);
        d
    }

    /// Paint a flat-topped box of height `h` spanning world x0..x1, y0..y1 as seen by
    /// `down_cam`.
    fn paint_box(d: &mut Image, x0: f64, x1: f64, y0: f64, y1: f64, h: f64) {
        let dist = 100.0 - h;
        let (cu, cv) = (319.5, 239.5);
        for v in 0..480 {
            for u in 0..640 {
                let wx = (u as f64 - cu) * dist / FOCAL;
                let wy = 60.0 + (v as f64 - cv) * dist / FOCAL;
                if wx >= x0 && wx <= x1 && wy >= y0 && wy <= y1 {
                    d.set16(u, v, (dist * SCALE) as u16);
                }
            }
        }
    }

    fn pipeline() -> NavPipeline {
        let mut nav = NavPipeline::new(NavConfig::default());
        nav.set_cam(0, down_cam()).unwrap();
        nav
    }

    #[test]
    fn clear_floor_has_no_obstacle() {
        let mut nav = pipeline();
        nav.begin_frame();
        assert!(nav.add_depth(&floor_depth(), 0).unwrap() > 100_000);
        let rep = nav.analyze().unwrap();
        assert_eq!(rep.sensors, 1);
        assert!(rep.obstacle.is_none());
        assert!(rep.people.is_empty());
        assert!(rep.is_clear(1000.0));
    }

    #[test]
    fn box_ahead_blocks_corridor() {
        let mut nav = pipeline();
        let mut d = floor_depth();
        paint_box(&mut d, -5.0, 5.0, 70.0, 80.0, 30.0);
        nav.begin_frame();
        nav.add_depth(&d, 0).unwrap();
        let rep = nav.analyze().unwrap();
        let dist = rep.obstacle.unwrap();
        assert!((dist - 70.0).abs() < 1.5, "obstacle at {}", dist);
        assert!(!rep.is_clear(100.0));
        assert!(rep.people.is_empty());
    }

    #[test]
    fn box_outside_corridor_ignored() {
        let mut nav = pipeline();
        let mut d = floor_depth();
        paint_box(&mut d, 30.0, 40.0, 70.0, 80.0, 30.0);
        nav.begin_frame();
        nav.add_depth(&d, 0).unwrap();
        assert!(nav.analyze().unwrap().obstacle.is_none());
    }

    #[test]
    fn person_is_tracked_and_followed() {
        let mut nav = pipeline();
        let mut d = floor_depth();
        paint_box(&mut d, -7.0, 7.0, 57.0, 67.0, 52.0);
        paint_box(&mut d, -3.0, 3.0, 59.0, 65.0, 64.0);
        let mut rep = None;
        for _ in 0..5 {
            nav.begin_frame();
            nav.add_depth(&d, 0).unwrap();
            rep = Some(nav.analyze().unwrap());
        }
        let rep = rep.unwrap();
        assert_eq!(rep.frame, 5);
        assert_eq!(rep.people.len(), 1);
        let p = &rep.people[0];
        assert_eq!(p.id, 1);
        assert!(p.pos.x.abs() < 1.0 && (p.pos.y - 62.0).abs() < 2.0, "{:?}", p.pos);
        let f = rep.follow.unwrap();
        assert_eq!(f.id, 1);
        assert!(f.heading.abs() < 2.0);
        assert!((f.range - 62.0).abs() < 2.5);

        nav.follow(Some(7));
        assert!(nav.follow_target().is_none());
    }

    /// Reports a face when the middle of the patch is bright.
    struct BrightMiddle;

    impl FaceFinder for BrightMiddle {
        fn frontal(&mut self, patch: &Image) -> Vec<Roi> {
            let (w, h) = (patch.width(), patch.height());
            if patch.mono_at(w / 2, h / 2) > 200 {
                vec![Roi::new(w as i32 / 4, h as i32 / 4, w as i32 / 2, h as i32 / 2)]
            } else {
                Vec::new()
            }
        }
    }

    #[test]
    fn rolled_color_camera_sees_face() {
        let mut nav = pipeline();
        let side = CameraRecord::new(1, [0.0, 0.0, 60.0], 0.0, 0.0, 90.0);
        nav.set_cam(1, side.clone()).unwrap();
        nav.set_face_finder(Box::new(BrightMiddle));

        let mut d = floor_depth();
        paint_box(&mut d, -17.0, -3.0, 57.0, 67.0, 52.0);
        paint_box(&mut d, -13.0, -7.0, 59.0, 65.0, 64.0);

        // bright face where the rolled camera sees it, off the frame's centre
        let optics = nav.overhead().optics();
        let face = Vector3::new(-10.0, 62.0, 60.0);
        let (u, v) = optics.project(&side.to_camera(&face)).unwrap();
        assert!((v - 239.5).abs() > 60.0 || (u - 319.5).abs() > 60.0);
        let mut color = Image::new(640, 480, 3);
        color.fill_roi(&Roi::new(u as i32 - 30, v as i32 - 30, 60, 60), 255);

        let mut frontal = Vec::new();
        for _ in 0..12 {
            nav.begin_frame();
            nav.add_depth(&d, 0).unwrap();
            nav.add_color(&color, 1).unwrap();
            frontal.push(nav.analyze().unwrap().frontal);
        }
        assert_eq!(frontal.last(), Some(&1), "frontal per frame {:?}", frontal);
        let b = nav.tracker().body(nav.tracker().track_index(1).unwrap()).unwrap();
        assert!(b.gaze.is_valid());
    }
}
