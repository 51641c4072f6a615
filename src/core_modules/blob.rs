// THEORY:
// The `BlobTable` extends the box table with first and second moments of each
// component, from which it derives a centroid and an equivalent ellipse (major and
// minor axis, orientation). It also carries a scalar "value" column that is filled by
// per-component aggregation over a secondary image (min, max or average), which is how
// callers ask questions like "how tall is the tallest point of this blob" on a height map.
//
// Moments are accumulated in a single pass over the label image; the ellipse is closed
// form from the 2x2 central moment matrix.

use std::ops::{Deref, DerefMut};

use crate::core_modules::bbox::BBoxTable;
use crate::core_modules::image::Image;
use crate::error::{Error, Result};

/// Per-component moment sums.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Moments {
    pub sx: f64,
    pub sy: f64,
    pub sxx: f64,
    pub syy: f64,
    pub sxy: f64,
}

/// Equivalent ellipse of a component: full axis lengths and major-axis angle in degrees
/// counter-clockwise from the x axis.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Ellipse {
    pub major: f64,
    pub minor: f64,
    pub angle: f64,
}

#[derive(Debug, Clone, Default)]
pub struct BlobTable {
    table: BBoxTable,
    moments: Vec<Moments>,
    /// Aggregated secondary value per component.
    pub value: Vec<f64>,
}

impl Deref for BlobTable {
    type Target = BBoxTable;

    fn deref(&self) -> &BBoxTable {
        &self.table
    }
}

impl DerefMut for BlobTable {
    fn deref_mut(&mut self) -> &mut BBoxTable {
        &mut self.table
    }
}

impl BlobTable {
    pub fn new(n: usize) -> Self {
        let mut b = Self::default();
        b.table.set_size(n);
        b.moments.resize(b.table.size(), Moments::default());
        b.value.resize(b.table.size(), 0.0);
        b
    }

    /// Measure boxes, counts and moments from a 16-bit label image with `n` labels.
    pub fn find_params(&mut self, labels: &Image, n: usize) -> Result<usize> {
        let nv = self.table.find_bbox(labels, n)?;
        let sz = self.table.size();
        self.moments.clear();
        self.moments.resize(sz, Moments::default());
        self.value.clear();
        self.value.resize(sz, 0.0);
        let r = labels.roi();
        for y in r.y..r.y1() {
            for x in r.x..r.x1() {
                let lab = labels.get16(x as usize, y as usize) as usize;
                if lab == 0 || lab >= sz {
                    continue;
                }
                let (fx, fy) = (x as f64, y as f64);
                let m = &mut self.moments[lab];
                m.sx += fx;
                m.sy += fy;
                m.sxx += fx * fx;
                m.syy += fy * fy;
                m.sxy += fx * fy;
            }
        }
        Ok(nv)
    }

    pub fn moments(&self, i: usize) -> Moments {
        self.moments.get(i).copied().unwrap_or_default()
    }

    /// Centroid of component `i` in pixel coordinates.
    pub fn centroid(&self, i: usize) -> Option<(f64, f64)> {
        let n = self.pixels(i) as f64;
        if n <= 0.0 {
            return None;
        }
        let m = self.moments(i);
        Some((m.sx / n, m.sy / n))
    }

    /// Ellipse with the same second moments as component `i`.
    pub fn ellipse(&self, i: usize) -> Option<Ellipse> {
        let n = self.pixels(i) as f64;
        let (cx, cy) = self.centroid(i)?;
        let m = self.moments(i);
        let vxx = m.sxx / n - cx * cx;
        let vyy = m.syy / n - cy * cy;
        let vxy = m.sxy / n - cx * cy;
        let mid = 0.5 * (vxx + vyy);
        let dif = (0.25 * (vxx - vyy) * (vxx - vyy) + vxy * vxy).sqrt();
        let (l1, l2) = ((mid + dif).max(0.0), (mid - dif).max(0.0));
        // a uniform ellipse with semi-axis s has variance s²/4 along that axis
        Some(Ellipse {
            major: 4.0 * l1.sqrt(),
            minor: 4.0 * l2.sqrt(),
            angle: 0.5 * (2.0 * vxy).atan2(vxx - vyy).to_degrees(),
        })
    }

    fn aggregate(&mut self, labels: &Image, data: &Image, mode: Agg) -> Result<()> {
        labels.check_fields(2)?;
        data.check_fields(1)?;
        if !labels.same_size(data) {
            return Err(Error::SizeMismatch { expected: labels.describe(), actual: data.describe() });
        }
        let sz = self.table.size();
        let init = match mode {
            Agg::Min => f64::MAX,
            Agg::Max => f64::MIN,
            Agg::Avg => 0.0,
        };
        let mut acc = vec![init; sz];
        let mut cnt = vec![0u32; sz];
        let r = labels.joint_roi(&[data]);
        for y in r.y as usize..r.y1() as usize {
            for x in r.x as usize..r.x1() as usize {
                let lab = labels.get16(x, y) as usize;
                if lab == 0 || lab >= sz {
                    continue;
                }
                let v = data.get(x, y) as f64;
                acc[lab] = match mode {
                    Agg::Min => acc[lab].min(v),
                    Agg::Max => acc[lab].max(v),
                    Agg::Avg => acc[lab] + v,
                };
                cnt[lab] += 1;
            }
        }
        self.value.resize(sz, 0.0);
        for i in 1..sz {
            self.value[i] = match (cnt[i], mode) {
                (0, _) => 0.0,
                (c, Agg::Avg) => acc[i] / c as f64,
                _ => acc[i],
            };
        }
        Ok(())
    }

    /// Minimum of `data` over each component.
    pub fn min_each(&mut self, labels: &Image, data: &Image) -> Result<()> {
        self.aggregate(labels, data, Agg::Min)
    }

    /// Maximum of `data` over each component.
    pub fn max_each(&mut self, labels: &Image, data: &Image) -> Result<()> {
        self.aggregate(labels, data, Agg::Max)
    }

    /// Mean of `data` over each component.
    pub fn avg_each(&mut self, labels: &Image, data: &Image) -> Result<()> {
        self.aggregate(labels, data, Agg::Avg)
    }

    /// Valid component whose centroid is closest to (x, y).
    pub fn nearest(&self, x: f64, y: f64) -> Option<usize> {
        self.valid_ids()
            .filter_map(|i| self.centroid(i).map(|(cx, cy)| (i, (cx - x).powi(2) + (cy - y).powi(2))))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)
    }

    /// Valid component under pixel (x, y), if any.
    pub fn blob_at(&self, labels: &Image, x: i32, y: i32) -> Option<usize> {
        if !labels.in_bounds(x, y) || labels.fields() != 2 {
            return None;
        }
        let lab = labels.get16(x as usize, y as usize) as usize;
        self.is_valid(lab).then_some(lab)
    }

    /// Number of valid components whose value exceeds `th`.
    pub fn count_over(&self, th: f64) -> usize {
        self.valid_ids().filter(|&i| self.value[i] > th).count()
    }

    /// Paint the valid components with value over `th` into `dest` as `mark`
    /// (other in-window pixels are left alone).
    pub fn mark_over(&self, dest: &mut Image, labels: &Image, th: f64, mark: u8) -> Result<usize> {
        dest.check_fields(1)?;
        labels.check_fields(2)?;
        let r = dest.joint_roi(&[labels]);
        let mut n = 0;
        for y in r.y as usize..r.y1() as usize {
            for x in r.x as usize..r.x1() as usize {
                let lab = labels.get16(x, y) as usize;
                if self.is_valid(lab) && self.value[lab] > th {
                    dest.set(x, y, mark);
                    n += 1;
                }
            }
        }
        Ok(n)
    }
}

#[derive(Clone, Copy)]
enum Agg {
    Min,
    Max,
    Avg,
}
