// THEORY:
// The `PersonTracker` adds memory to the person finder. It owns a fixed pool of
// `BodyData` slots and, every frame, associates the raw detections with the slots it
// is already following.
//
// This module solves the data association problem for heads, hands and gaze.
//
// Key architectural principles:
// 1.  **Greedy association**: all track-to-detection distances are tabulated and the
//     globally closest pair is taken first, then the next closest among what is left,
//     up to a gating distance. Confirmed tracks get the first pass; tentative tracks
//     only compete for what remains.
// 2.  **Lifecycle**: a detection nobody claims starts a tentative track. Consecutive hits
//     promote it and assign the next id from a monotonically increasing counter, so ids
//     are never reused. Misses drain a confirmed track until its slot is reclaimed.
// 3.  **Anchoring**: an optional rule keeps a confirmed track alive without penalty while
//     the map still shows something of the right height where its head was.
// 4.  **Hands and gaze**: each track runs the same association and lifecycle for its two
//     hands (with a direction term in the distance) and for a gaze estimate fed by the
//     face probe.

use nalgebra::Vector3;

use crate::core_modules::body::{BodyData, NodeHandle};
use crate::core_modules::overhead::Overhead;
use crate::core_modules::person_finder::{FinderParams, PersonFinder, RawHand, RawPerson};
use crate::error::Result;
use crate::params::{ParamSet, Tunable};

#[derive(Debug, Clone, PartialEq)]
pub struct TrackerParams {
    /// Number of body slots.
    pub tmax: usize,
    /// Head gate (in), position mix, hits to promote, misses to drop.
    pub dmax0: f64,
    pub pmix0: f64,
    pub hit0: i32,
    pub miss0: i32,
    /// Unmatched tracks with a body blob this close to the head lose no life (in, 0 disables).
    pub anchor: f64,
    /// Hand gate (in), direction weight, position mix, hits and misses.
    pub dmax: f64,
    pub awt: f64,
    pub hmix: f64,
    pub hit: i32,
    pub miss: i32,
    /// Gaze hits and misses, and per-frame decay of the gaze sum.
    pub hit2: i32,
    pub miss2: i32,
    pub gdecay: f64,
    /// Offset added to head height (seated posture correction).
    pub edn: f64,
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self {
            tmax: 10,
            dmax0: 18.0,
            pmix0: 0.9,
            hit0: 5,
            miss0: 15,
            anchor: 0.0,
            dmax: 12.0,
            awt: 6.0,
            hmix: 0.5,
            hit: 5,
            miss: 5,
            hit2: 5,
            miss2: 5,
            gdecay: 0.8,
            edn: 0.0,
        }
    }
}

impl Tunable for TrackerParams {
    fn params(&self) -> ParamSet {
        let d = Self::default();
        ParamSet::new("track")
            .int("tmax", self.tmax as i64, d.tmax as i64, "Body slots")
            .float("dmax0", self.dmax0, d.dmax0, "Head match distance (in)")
            .float("pmix0", self.pmix0, d.pmix0, "Head position update rate")
            .int("hit0", self.hit0 as i64, d.hit0 as i64, "Head hits to confirm")
            .int("miss0", self.miss0 as i64, d.miss0 as i64, "Head misses to drop")
            .float("anchor", self.anchor, d.anchor, "Anchor radius around the head (in)")
            .float("dmax", self.dmax, d.dmax, "Hand match distance (in)")
            .float("awt", self.awt, d.awt, "Hand direction weight")
            .float("hmix", self.hmix, d.hmix, "Hand update rate")
            .int("hit", self.hit as i64, d.hit as i64, "Hand hits to confirm")
            .int("miss", self.miss as i64, d.miss as i64, "Hand misses to drop")
            .int("hit2", self.hit2 as i64, d.hit2 as i64, "Gaze hits to confirm")
            .int("miss2", self.miss2 as i64, d.miss2 as i64, "Gaze misses to drop")
            .float("gdecay", self.gdecay, d.gdecay, "Gaze sum decay")
            .float("edn", self.edn, d.edn, "Head height offset (in)")
    }

    fn set_params(&mut self, ps: &ParamSet) {
        self.tmax = ps.usize_or("tmax", self.tmax).max(1);
        self.dmax0 = ps.f64_or("dmax0", self.dmax0);
        self.pmix0 = ps.f64_or("pmix0", self.pmix0);
        self.hit0 = ps.i64_or("hit0", self.hit0 as i64) as i32;
        self.miss0 = ps.i64_or("miss0", self.miss0 as i64) as i32;
        self.anchor = ps.f64_or("anchor", self.anchor);
        self.dmax = ps.f64_or("dmax", self.dmax);
        self.awt = ps.f64_or("awt", self.awt);
        self.hmix = ps.f64_or("hmix", self.hmix);
        self.hit = ps.i64_or("hit", self.hit as i64) as i32;
        self.miss = ps.i64_or("miss", self.miss as i64) as i32;
        self.hit2 = ps.i64_or("hit2", self.hit2 as i64) as i32;
        self.miss2 = ps.i64_or("miss2", self.miss2 as i64) as i32;
        self.gdecay = ps.f64_or("gdecay", self.gdecay);
        self.edn = ps.f64_or("edn", self.edn);
    }
}

/// Which hand.
pub const LEFT: usize = 0;
pub const RIGHT: usize = 1;

/// Greedy assignment over a row-major `rows` × `cols` distance table: repeatedly take the
/// smallest remaining entry not above `lim` whose row passes `eligible`.
fn greedy_pass<F: Fn(usize) -> bool>(
    dist: &[f64],
    cols: usize,
    eligible: F,
    row_used: &mut [bool],
    col_used: &mut [bool],
    lim: f64,
    out: &mut Vec<(usize, usize)>,
) {
    loop {
        let mut best: Option<(usize, usize, f64)> = None;
        for (r, used) in row_used.iter().enumerate() {
            if *used || !eligible(r) {
                continue;
            }
            for c in 0..cols {
                if col_used[c] {
                    continue;
                }
                let d = dist[r * cols + c];
                if d <= lim && best.is_none_or(|(_, _, bd)| d < bd) {
                    best = Some((r, c, d));
                }
            }
        }
        let Some((r, c, _)) = best else {
            return;
        };
        row_used[r] = true;
        col_used[c] = true;
        out.push((r, c));
    }
}

/// Multi-person head, hand and gaze tracker.
#[derive(Debug, Clone)]
pub struct PersonTracker {
    pub ps: TrackerParams,
    pub finder: PersonFinder,
    bodies: Vec<BodyData>,
    /// One past the highest slot in use.
    nb: usize,
    last_id: i32,
    raw: Vec<RawPerson>,
    gaze_obs: Vec<Vector3<f64>>,
    gaze_cnt: Vec<u32>,
}

impl Default for PersonTracker {
    fn default() -> Self {
        Self::new(TrackerParams::default(), FinderParams::default())
    }
}

impl PersonTracker {
    pub fn new(ps: TrackerParams, fps: FinderParams) -> Self {
        let n = ps.tmax;
        Self {
            ps,
            finder: PersonFinder::new(fps),
            bodies: vec![BodyData::default(); n],
            nb: 0,
            last_id: 0,
            raw: Vec::new(),
            gaze_obs: vec![Vector3::zeros(); n],
            gaze_cnt: vec![0; n],
        }
    }

    /// Forget every track. Ids keep increasing across resets.
    pub fn reset(&mut self) {
        let n = self.ps.tmax.max(1);
        self.bodies.clear();
        self.bodies.resize(n, BodyData::default());
        self.gaze_obs = vec![Vector3::zeros(); n];
        self.gaze_cnt = vec![0; n];
        self.nb = 0;
        self.raw.clear();
    }

    /// Slots that may hold data (free slots included).
    pub fn slots(&self) -> &[BodyData] {
        &self.bodies[..self.nb]
    }

    pub fn body(&self, i: usize) -> Option<&BodyData> {
        self.bodies[..self.nb].get(i)
    }

    /// Detections used in the last update.
    pub fn raw(&self) -> &[RawPerson] {
        &self.raw
    }

    pub fn last_id(&self) -> i32 {
        self.last_id
    }

    /// Number of confirmed tracks.
    pub fn cnt_tracked(&self) -> usize {
        self.slots().iter().filter(|b| b.is_tracked()).count()
    }

    /// Slot holding a given id.
    pub fn track_index(&self, id: i32) -> Option<usize> {
        if id < 0 {
            return None;
        }
        self.slots().iter().position(|b| b.id == id)
    }

    /// Detect people on the map of `oh` and update the tracks. Returns the number of
    /// confirmed tracks.
    pub fn track_people(&mut self, oh: &Overhead) -> Result<usize> {
        let raw = self.finder.find(oh)?;
        Ok(self.update(raw, Some(oh)))
    }

    /// Update the tracks from externally produced detections.
    pub fn track_raw(&mut self, raw: &[RawPerson]) -> usize {
        self.update(raw.to_vec(), None)
    }

    fn update(&mut self, raw: Vec<RawPerson>, oh: Option<&Overhead>) -> usize {
        for b in &mut self.bodies {
            b.hok = false;
            b.busy = [false; 2];
        }
        let rows: Vec<usize> = (0..self.nb).filter(|&i| self.bodies[i].id >= 0).collect();
        let cols = raw.len();
        let mut dist = vec![f64::MAX; rows.len() * cols];
        for (r, &i) in rows.iter().enumerate() {
            for (c, det) in raw.iter().enumerate() {
                dist[r * cols + c] = (self.bodies[i].pos - det.pos).norm_squared();
            }
        }
        let lim = self.ps.dmax0 * self.ps.dmax0;
        let mut row_used = vec![false; rows.len()];
        let mut col_used = vec![false; cols];
        let mut pairs = Vec::new();
        let ids: Vec<i32> = rows.iter().map(|&i| self.bodies[i].id).collect();
        greedy_pass(&dist, cols, |r| ids[r] >= 1, &mut row_used, &mut col_used, lim, &mut pairs);
        greedy_pass(&dist, cols, |r| ids[r] >= 0, &mut row_used, &mut col_used, lim, &mut pairs);

        for &(r, c) in &pairs {
            self.update_head(rows[r], &raw[c]);
        }
        for (r, &i) in rows.iter().enumerate() {
            if row_used[r] || self.anchored(i, oh) {
                continue;
            }
            let b = &mut self.bodies[i];
            if b.life.miss() {
                if b.id > 0 {
                    log::info!("track {} lost", b.id);
                }
                b.clear();
            } else {
                self.hand_misses(i);
            }
        }
        for (c, det) in raw.iter().enumerate() {
            if !col_used[c] {
                self.spawn(det);
            }
        }
        while self.nb > 0 && self.bodies[self.nb - 1].is_free() {
            self.nb -= 1;
        }
        self.raw = raw;
        self.cnt_tracked()
    }

    fn anchored(&self, i: usize, oh: Option<&Overhead>) -> bool {
        let b = &self.bodies[i];
        if self.ps.anchor <= 0.0 || b.id <= 0 {
            return false;
        }
        oh.is_some_and(|m| self.finder.body_near(m, b.pos.x, b.pos.y, self.ps.anchor))
    }

    fn update_head(&mut self, i: usize, det: &RawPerson) {
        let (pmix, hit0, miss0) = (self.ps.pmix0, self.ps.hit0, self.ps.miss0);
        let b = &mut self.bodies[i];
        b.pos += pmix * (det.pos - b.pos);
        b.hok = true;
        b.bnum = det.blob;
        b.alt = det.pos.z;
        if b.life.hit(hit0, miss0) && b.id == 0 {
            self.last_id += 1;
            b.id = self.last_id;
            log::info!("track {} confirmed at ({:.1}, {:.1}, {:.1})", b.id, b.pos.x, b.pos.y, b.pos.z);
        }
        self.update_hands(i, &det.hands);
    }

    fn spawn(&mut self, det: &RawPerson) {
        let Some(i) = self.bodies.iter().position(|b| b.is_free()) else {
            log::warn!("tracker full, dropping detection at ({:.1}, {:.1})", det.pos.x, det.pos.y);
            return;
        };
        let (hit0, miss0) = (self.ps.hit0, self.ps.miss0);
        let b = &mut self.bodies[i];
        b.clear();
        b.id = 0;
        b.pos = det.pos;
        b.hok = true;
        b.bnum = det.blob;
        b.alt = det.pos.z;
        if b.life.start(hit0, miss0) {
            self.last_id += 1;
            b.id = self.last_id;
        }
        self.nb = self.nb.max(i + 1);
        self.update_hands(i, &det.hands);
    }

    fn update_hands(&mut self, i: usize, raw: &[RawHand]) {
        let ps = &self.ps;
        let b = &mut self.bodies[i];
        let head = b.pos;
        let n = raw.len().min(2);
        let mut dist = vec![f64::MAX; 2 * n];
        for s in 0..2 {
            if !b.hands[s].life.is_active() {
                continue;
            }
            for (r, rh) in raw.iter().take(n).enumerate() {
                let doff = (b.hands[s].off - (rh.pos - head)).norm();
                let ddir = (b.hands[s].dir - rh.dir).norm();
                dist[s * n + r] = doff + ps.awt * ddir;
            }
        }
        let confirmed = [b.hands[0].is_valid(), b.hands[1].is_valid()];
        let active = [b.hands[0].life.is_active(), b.hands[1].life.is_active()];
        let mut side_used = [false; 2];
        let mut raw_used = vec![false; n];
        let mut pairs = Vec::new();
        greedy_pass(&dist, n, |s| confirmed[s], &mut side_used, &mut raw_used, ps.dmax, &mut pairs);
        greedy_pass(&dist, n, |s| active[s], &mut side_used, &mut raw_used, ps.dmax, &mut pairs);

        for &(s, r) in &pairs {
            let h = &mut b.hands[s];
            let off = raw[r].pos - head;
            h.off += ps.hmix * (off - h.off);
            let d = h.dir + ps.hmix * (raw[r].dir - h.dir);
            if d.norm() > 1e-9 {
                h.dir = d.normalize();
            }
            h.life.hit(ps.hit, ps.miss);
            b.busy[s] = true;
            b.sep[s] = dist[s * n + r];
        }
        for s in 0..2 {
            if !side_used[s] && b.hands[s].life.is_active() && b.hands[s].life.miss() {
                b.hands[s].clear();
            }
        }
        // new hands keep their natural side when it is free, else take the other one
        for (r, rh) in raw.iter().take(n).enumerate() {
            if raw_used[r] {
                continue;
            }
            let off = rh.pos - head;
            let natural = if off.x < 0.0 { LEFT } else { RIGHT };
            let side = if !b.hands[natural].life.is_active() {
                natural
            } else if !b.hands[1 - natural].life.is_active() {
                1 - natural
            } else {
                continue;
            };
            let h = &mut b.hands[side];
            h.clear();
            h.off = off;
            h.dir = rh.dir;
            h.life.start(ps.hit, ps.miss);
            b.busy[side] = true;
        }
    }

    fn hand_misses(&mut self, i: usize) {
        for h in &mut self.bodies[i].hands {
            if h.life.is_active() && h.life.miss() {
                h.clear();
            }
        }
    }

    /// Clear both hands of a slot.
    pub fn clr_hands(&mut self, i: usize) {
        if let Some(b) = self.bodies.get_mut(i) {
            for h in &mut b.hands {
                h.clear();
            }
        }
    }

    // --- gaze ---

    /// Add one camera's face observation for slot `i` this frame (unit vector from head
    /// toward the camera).
    pub fn add_gaze(&mut self, i: usize, dir: Vector3<f64>) {
        if i < self.gaze_obs.len() {
            self.gaze_obs[i] += dir;
            self.gaze_cnt[i] += 1;
        }
    }

    /// Close the frame's gaze observations: tracked slots with no observation take a miss.
    pub fn finish_gaze(&mut self) {
        let (decay, hit2, miss2) = (self.ps.gdecay, self.ps.hit2, self.ps.miss2);
        for i in 0..self.nb {
            let obs = (self.gaze_cnt[i] > 0 && self.gaze_obs[i].norm() > 1e-9).then(|| self.gaze_obs[i].normalize());
            let b = &mut self.bodies[i];
            if b.id >= 0 {
                b.gaze.update(obs, decay, hit2, miss2);
            }
        }
        self.gaze_obs.iter_mut().for_each(|g| *g = Vector3::zeros());
        self.gaze_cnt.iter_mut().for_each(|c| *c = 0);
    }

    // --- derived queries ---

    /// Head height with the posture offset.
    pub fn height(&self, i: usize) -> Option<f64> {
        let b = self.body(i)?;
        (!b.is_free()).then_some(b.pos.z + self.ps.edn)
    }

    /// Height of a hand tip relative to the head (negative below).
    pub fn hand_over(&self, i: usize, side: usize) -> Option<f64> {
        let h = self.body(i)?.hands.get(side)?;
        h.life.is_active().then_some(h.off.z)
    }

    fn hand_ray(&self, i: usize, side: usize) -> Option<(Vector3<f64>, Vector3<f64>)> {
        let b = self.body(i)?;
        let h = b.hands.get(side)?;
        h.life.is_active().then(|| (b.pos + h.off, h.dir))
    }

    fn ray_hit(&self, i: usize, side: usize, axis: usize, val: f64) -> Option<Vector3<f64>> {
        let (tip, dir) = self.hand_ray(i, side)?;
        if dir[axis].abs() < 1e-6 {
            return None;
        }
        let t = (val - tip[axis]) / dir[axis];
        (t >= 0.0).then(|| tip + t * dir)
    }

    /// Where the pointing ray of a hand meets the horizontal plane at height `z`: (x, y).
    pub fn target_z(&self, i: usize, side: usize, z: f64) -> Option<(f64, f64)> {
        self.ray_hit(i, side, 2, z).map(|p| (p.x, p.y))
    }

    /// Where the pointing ray meets the plane y = `y`: (x, z).
    pub fn target_y(&self, i: usize, side: usize, y: f64) -> Option<(f64, f64)> {
        self.ray_hit(i, side, 1, y).map(|p| (p.x, p.z))
    }

    /// Where the pointing ray meets the plane x = `x`: (y, z).
    pub fn target_x(&self, i: usize, side: usize, x: f64) -> Option<(f64, f64)> {
        self.ray_hit(i, side, 0, x).map(|p| (p.y, p.z))
    }

    /// Find the tracked person whose map blob contains world point (wx, wy), flag the
    /// closer of their hands as touching, and return the person's id.
    pub fn person_touch(&mut self, oh: &Overhead, wx: f64, wy: f64) -> Option<i32> {
        let lab = self.finder.blob_under(oh, wx, wy);
        if lab == 0 {
            return None;
        }
        let i = self.slots().iter().position(|b| b.is_tracked() && b.hok && b.bnum == lab)?;
        let b = &mut self.bodies[i];
        let mut best: Option<(usize, f64)> = None;
        for s in 0..2 {
            b.hands[s].touch = false;
            if !b.hands[s].life.is_active() {
                continue;
            }
            let tip = b.pos + b.hands[s].off;
            let d = (tip.x - wx).powi(2) + (tip.y - wy).powi(2);
            if best.is_none_or(|(_, bd)| d < bd) {
                best = Some((s, d));
            }
        }
        if let Some((s, _)) = best {
            b.hands[s].touch = true;
        }
        Some(b.id)
    }

    // --- naming ---

    /// Attach a tag to a tracked id. Any other body holding the same tag loses it; an
    /// empty tag clears the name.
    pub fn set_name(&mut self, id: i32, tag: &str) -> bool {
        let Some(i) = self.track_index(id) else {
            return false;
        };
        if !tag.is_empty() {
            for b in self.bodies.iter_mut().filter(|b| b.tag == tag) {
                b.tag.clear();
            }
        }
        self.bodies[i].tag = tag.to_string();
        true
    }

    pub fn get_name(&self, id: i32) -> Option<&str> {
        let i = self.track_index(id)?;
        let t = &self.bodies[i].tag;
        (!t.is_empty()).then_some(t.as_str())
    }

    /// Id of the body carrying a tag.
    pub fn find_name(&self, tag: &str) -> Option<i32> {
        self.slots().iter().find(|b| !b.is_free() && b.tag == tag).map(|b| b.id)
    }

    pub fn set_node(&mut self, id: i32, node: Option<NodeHandle>) -> bool {
        let Some(i) = self.track_index(id) else {
            return false;
        };
        self.bodies[i].node = node;
        true
    }

    pub fn node(&self, id: i32) -> Option<NodeHandle> {
        self.bodies[self.track_index(id)?].node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::image::Image;
    use crate::core_modules::person_finder::tests::{paint_person, small_overhead};
    use crate::core_modules::roi::Roi;

    fn person_with_hand(x: f64, y: f64, z: f64, hx: f64) -> RawPerson {
        let mut p = RawPerson::at(x, y, z);
        let tip = Vector3::new(x + hx, y, z - 16.0);
        let dir = (tip - Vector3::new(x, y, z - 10.0)).normalize();
        p.hands.push(RawHand { pos: tip, dir });
        p
    }

    #[test]
    fn promotion_after_five_hits() {
        let mut t = PersonTracker::default();
        let det = [RawPerson::at(0.0, 60.0, 60.0)];
        for k in 0..4 {
            t.track_raw(&det);
            assert_eq!(t.cnt_tracked(), 0, "frame {}", k);
        }
        assert_eq!(t.track_raw(&det), 1);
        let i = t.track_index(1).unwrap();
        assert!((t.body(i).unwrap().pos - det[0].pos).norm() < 0.5);
    }

    #[test]
    fn confirmed_track_decays_and_is_reclaimed() {
        let mut t = PersonTracker::default();
        let det = [RawPerson::at(0.0, 60.0, 60.0)];
        for _ in 0..5 {
            t.track_raw(&det);
        }
        for k in 1..=20 {
            let n = t.track_raw(&[]);
            if k < 15 {
                assert_eq!(n, 1, "frame {}", k);
            }
        }
        assert_eq!(t.cnt_tracked(), 0);
        assert!(t.slots().is_empty());
        assert_eq!(t.track_index(1), None);
    }

    #[test]
    fn tentative_track_dies_on_miss_and_ids_increase() {
        let mut t = PersonTracker::default();
        t.track_raw(&[RawPerson::at(0.0, 60.0, 60.0)]);
        t.track_raw(&[]);
        assert!(t.slots().is_empty());
        let a = [RawPerson::at(0.0, 60.0, 60.0), RawPerson::at(60.0, 60.0, 66.0)];
        for _ in 0..5 {
            t.track_raw(&a);
        }
        assert_eq!(t.cnt_tracked(), 2);
        let mut ids: Vec<i32> = t.slots().iter().map(|b| b.id).collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn greedy_prefers_closest_pair() {
        let mut t = PersonTracker::default();
        let start = [RawPerson::at(0.0, 60.0, 60.0), RawPerson::at(20.0, 60.0, 60.0)];
        for _ in 0..5 {
            t.track_raw(&start);
        }
        let a = t.track_index(1).unwrap();
        let b = t.track_index(2).unwrap();
        let xa = t.body(a).unwrap().pos.x;
        // both move 8 inches right: each still closest to its own track
        let moved = [RawPerson::at(28.0, 60.0, 60.0), RawPerson::at(8.0, 60.0, 60.0)];
        t.track_raw(&moved);
        assert!((t.body(a).unwrap().pos.x - (xa + 0.9 * 8.0)).abs() < 1e-6);
        assert!(t.body(b).unwrap().pos.x > 20.0);
    }

    #[test]
    fn hands_keep_their_side_and_point() {
        let mut t = PersonTracker::default();
        let det = [person_with_hand(0.0, 60.0, 60.0, 20.0)];
        for _ in 0..5 {
            t.track_raw(&det);
        }
        let i = t.track_index(1).unwrap();
        let b = t.body(i).unwrap();
        assert!(b.hands[RIGHT].is_valid());
        assert!(!b.hands[LEFT].life.is_active());
        assert!((t.hand_over(i, RIGHT).unwrap() + 16.0).abs() < 1e-6);
        let (x, _) = t.target_z(i, RIGHT, 0.0).unwrap();
        assert!(x > 20.0);
        assert!(t.target_z(i, LEFT, 0.0).is_none());
    }

    #[test]
    fn names_are_unique() {
        let mut t = PersonTracker::default();
        let a = [RawPerson::at(0.0, 60.0, 60.0), RawPerson::at(60.0, 60.0, 66.0)];
        for _ in 0..5 {
            t.track_raw(&a);
        }
        assert!(t.set_name(1, "ann"));
        assert!(t.set_name(2, "ann"));
        assert_eq!(t.get_name(1), None);
        assert_eq!(t.get_name(2), Some("ann"));
        assert_eq!(t.find_name("ann"), Some(2));
        assert!(t.set_name(2, ""));
        assert_eq!(t.get_name(2), None);
        assert!(!t.set_name(9, "bob"));
        assert!(t.set_node(1, Some(NodeHandle(7))));
        assert_eq!(t.node(1), Some(NodeHandle(7)));
    }

    #[test]
    fn gaze_needs_repeated_faces() {
        let mut t = PersonTracker::default();
        let det = [RawPerson::at(0.0, 60.0, 60.0)];
        for _ in 0..5 {
            t.track_raw(&det);
        }
        let i = t.track_index(1).unwrap();
        for _ in 0..5 {
            t.add_gaze(i, Vector3::new(0.0, -1.0, 0.0));
            t.finish_gaze();
        }
        assert!(t.body(i).unwrap().gaze.is_valid());
        assert!(t.body(i).unwrap().gaze.dir.y < -0.99);
    }

    #[test]
    fn body_blob_anchors_lost_head() {
        let mut oh = small_overhead();
        let mut map = Image::new(100, 100, 1);
        paint_person(&oh, &mut map, 30, 60, false);
        oh.load_map(&map).unwrap();
        let mut t = PersonTracker::default();
        t.ps.anchor = 4.0;
        for _ in 0..5 {
            t.track_people(&oh).unwrap();
        }
        assert_eq!(t.cnt_tracked(), 1);

        // crouching: the body is still there but too low for a head
        map.clear_all();
        map.fill_roi(&Roi::new(23, 55, 14, 10), oh.encode(35.0));
        oh.load_map(&map).unwrap();
        for k in 0..30 {
            assert_eq!(t.track_people(&oh).unwrap(), 1, "frame {}", k);
        }

        // gone
        map.clear_all();
        oh.load_map(&map).unwrap();
        for _ in 0..20 {
            t.track_people(&oh).unwrap();
        }
        assert_eq!(t.cnt_tracked(), 0);
    }

    #[test]
    fn map_tracking_and_touch() {
        let mut oh = small_overhead();
        let mut map = Image::new(100, 100, 1);
        paint_person(&oh, &mut map, 30, 60, true);
        oh.load_map(&map).unwrap();
        let mut t = PersonTracker::default();
        for _ in 0..5 {
            t.track_people(&oh).unwrap();
        }
        assert_eq!(t.cnt_tracked(), 1);
        // touch a point on the outstretched arm
        let (wx, wy) = oh.geometry().to_world(50.0, 60.0);
        assert_eq!(t.person_touch(&oh, wx, wy), Some(1));
        let i = t.track_index(1).unwrap();
        assert!(t.body(i).unwrap().hands[RIGHT].touch);
        let (ex, ey) = oh.geometry().to_world(90.0, 10.0);
        assert_eq!(t.person_touch(&oh, ex, ey), None);
    }
}
