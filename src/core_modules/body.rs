// THEORY:
// `BodyData` is one tracker slot: the state of a single person over time. Unlike a raw
// detection, which describes one frame, a body remembers where its head was, which of
// its two hands has been seen on which side, and where its face has been looking.
//
// Every tracked quantity (head, each hand, gaze) goes through the same `Lifecycle`:
//   • a new observation starts a tentative run that counts consecutive hits,
//   • a tentative run is dropped on its first miss,
//   • enough hits promote it; promotion fills a reservoir of allowed misses,
//   • every later hit refills the reservoir and every miss drains it by one,
//   • an empty reservoir frees the slot.

use nalgebra::Vector3;

/// Hit/miss bookkeeping shared by heads, hands and gaze.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Lifecycle {
    cnt: i32,
    confirmed: bool,
    active: bool,
}

impl Lifecycle {
    /// Begin a tentative run with its first hit. Returns true if that alone promotes it.
    pub fn start(&mut self, nhit: i32, nmiss: i32) -> bool {
        self.active = true;
        self.confirmed = false;
        self.cnt = 0;
        self.hit(nhit, nmiss)
    }

    /// Record a hit. Returns true on the frame the run is promoted.
    pub fn hit(&mut self, nhit: i32, nmiss: i32) -> bool {
        if self.confirmed {
            self.cnt = nmiss;
            return false;
        }
        self.cnt += 1;
        if self.cnt >= nhit {
            self.confirmed = true;
            self.cnt = nmiss.max(1);
            return true;
        }
        false
    }

    /// Record a miss. Returns true when the run should be freed.
    pub fn miss(&mut self) -> bool {
        if !self.confirmed {
            self.clear();
            return true;
        }
        self.cnt -= 1;
        if self.cnt <= 0 {
            self.clear();
            return true;
        }
        false
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    /// Consecutive hits while tentative, remaining misses once confirmed.
    pub fn count(&self) -> i32 {
        self.cnt
    }
}

/// One hand, relative to its owner's head.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HandData {
    /// Tip position minus head position, inches.
    pub off: Vector3<f64>,
    /// Unit pointing direction (shoulder to tip).
    pub dir: Vector3<f64>,
    pub life: Lifecycle,
    /// Set by `PersonTracker::person_touch` when this hand was the closer one.
    pub touch: bool,
}

impl HandData {
    pub fn is_valid(&self) -> bool {
        self.life.is_confirmed()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Smoothed gaze from per-frame face observations.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GazeData {
    /// Decaying sum of observed unit vectors.
    pub sum: Vector3<f64>,
    /// Current smoothed direction (unit, or zero when unknown).
    pub dir: Vector3<f64>,
    pub life: Lifecycle,
}

impl GazeData {
    pub fn is_valid(&self) -> bool {
        self.life.is_confirmed()
    }

    /// Fold in one frame's observation (or its absence).
    pub fn update(&mut self, obs: Option<Vector3<f64>>, decay: f64, nhit: i32, nmiss: i32) {
        match obs {
            Some(v) => {
                if self.life.is_active() {
                    self.sum = self.sum * decay + v;
                    self.life.hit(nhit, nmiss);
                } else {
                    self.sum = v;
                    self.life.start(nhit, nmiss);
                }
                let n = self.sum.norm();
                if n > 1e-9 {
                    self.dir = self.sum / n;
                }
            }
            None => {
                if self.life.is_active() && self.life.miss() {
                    *self = Self::default();
                }
            }
        }
    }
}

/// Opaque handle to an externally owned semantic node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle(pub u64);

/// One tracker slot.
#[derive(Debug, Clone, PartialEq)]
pub struct BodyData {
    /// Negative when free, 0 while tentative, positive once confirmed.
    pub id: i32,
    /// Head position: world x, y and height above the table, inches.
    pub pos: Vector3<f64>,
    pub hands: [HandData; 2],
    pub gaze: GazeData,
    pub tag: String,
    pub node: Option<NodeHandle>,
    pub life: Lifecycle,
    /// Head matched this frame.
    pub hok: bool,
    /// Map component of the last matched detection (0 if none).
    pub bnum: usize,
    /// Highest map height seen under the head last frame.
    pub alt: f64,
    /// Hand slots matched this frame.
    pub busy: [bool; 2],
    /// Hand match distance this frame.
    pub sep: [f64; 2],
}

impl Default for BodyData {
    fn default() -> Self {
        Self {
            id: -1,
            pos: Vector3::zeros(),
            hands: [HandData::default(); 2],
            gaze: GazeData::default(),
            tag: String::new(),
            node: None,
            life: Lifecycle::default(),
            hok: false,
            bnum: 0,
            alt: 0.0,
            busy: [false; 2],
            sep: [0.0; 2],
        }
    }
}

impl BodyData {
    pub fn is_free(&self) -> bool {
        self.id < 0
    }

    pub fn is_tracked(&self) -> bool {
        self.id > 0
    }

    /// Return the slot to the free pool.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// World position of a hand tip.
    pub fn hand_pos(&self, side: usize) -> Option<Vector3<f64>> {
        let h = self.hands.get(side)?;
        h.life.is_active().then(|| self.pos + h.off)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tentative_dies_on_first_miss() {
        let mut l = Lifecycle::default();
        assert!(!l.start(5, 15));
        l.hit(5, 15);
        assert_eq!(l.count(), 2);
        assert!(l.miss());
        assert!(!l.is_active());
    }

    #[test]
    fn confirmed_reservoir_refills() {
        let mut l = Lifecycle::default();
        l.start(3, 4);
        l.hit(3, 4);
        assert!(l.hit(3, 4));
        assert!(l.is_confirmed());
        for _ in 0..3 {
            assert!(!l.miss());
        }
        l.hit(3, 4);
        assert_eq!(l.count(), 4);
        for _ in 0..3 {
            assert!(!l.miss());
        }
        assert!(l.miss());
    }

    #[test]
    fn gaze_smooths_and_expires() {
        let mut g = GazeData::default();
        let v = Vector3::new(0.0, -1.0, 0.0);
        for _ in 0..5 {
            g.update(Some(v), 0.8, 5, 2);
        }
        assert!(g.is_valid());
        assert!((g.dir - v).norm() < 1e-9);
        g.update(None, 0.8, 5, 2);
        assert!(g.is_valid());
        g.update(None, 0.8, 5, 2);
        assert!(!g.is_valid());
        assert_eq!(g.dir, Vector3::zeros());
    }
}
