// THEORY:
// The `toolkit` holds the small set of neighbourhood operations the core algorithms are
// built from: box averages, box max/min (dilation and erosion), thresholding, connected
// component labelling, hole filling, edge responses, resampling, right-angle rotations
// and a bilinear rotated crop. Each one:
//   • checks its operand formats and returns an error on a mismatch,
//   • writes only inside the joint window of its operands,
//   • reads neighbours with clamping at the image border (never wraps).
//
// Spatial pooling (`sample_down`) collapses each block of source pixels to its mean,
// suppressing single-pixel sensor noise before any temporal analysis runs.

use crate::core_modules::image::Image;
use crate::core_modules::roi::Roi;
use crate::error::{Error, Result};

/// Value written for "on" pixels in binary masks.
pub const ON: u8 = 255;

fn clamp_read(img: &Image, x: i32, y: i32) -> u8 {
    let cx = x.clamp(0, img.width() as i32 - 1) as usize;
    let cy = y.clamp(0, img.height() as i32 - 1) as usize;
    img.get(cx, cy)
}

fn check_mono_pair(dest: &Image, src: &Image) -> Result<()> {
    src.check_fields(1)?;
    dest.check_format(src)
}

/// Square box average of side `sz` (odd sizes center exactly).
pub fn box_avg(dest: &mut Image, src: &Image, sz: usize) -> Result<()> {
    check_mono_pair(dest, src)?;
    let r = dest.joint_roi(&[src]);
    let half = (sz / 2) as i32;
    let area = ((2 * half + 1) * (2 * half + 1)) as u32;
    for y in r.y..r.y1() {
        for x in r.x..r.x1() {
            let mut sum = 0u32;
            for dy in -half..=half {
                for dx in -half..=half {
                    sum += clamp_read(src, x + dx, y + dy) as u32;
                }
            }
            dest.set(x as usize, y as usize, ((sum + area / 2) / area) as u8);
        }
    }
    Ok(())
}

fn box_extreme(dest: &mut Image, src: &Image, sz: usize, take_max: bool) -> Result<()> {
    check_mono_pair(dest, src)?;
    let r = dest.joint_roi(&[src]);
    let half = (sz / 2) as i32;
    if half == 0 {
        let mut tmp = src.clone();
        tmp.set_roi(r);
        dest.copy_from(&tmp)?;
        return Ok(());
    }
    // separable: horizontal pass into a scratch row buffer, then vertical pass
    let (w, h) = (src.width() as i32, src.height() as i32);
    let mut horiz = vec![0u8; (w * h) as usize];
    for y in 0..h {
        for x in r.x.max(0)..r.x1() {
            let mut v = if take_max { 0u8 } else { 255u8 };
            for dx in -half..=half {
                let p = clamp_read(src, x + dx, y);
                v = if take_max { v.max(p) } else { v.min(p) };
            }
            horiz[(y * w + x) as usize] = v;
        }
    }
    for y in r.y..r.y1() {
        for x in r.x..r.x1() {
            let mut v = if take_max { 0u8 } else { 255u8 };
            for dy in -half..=half {
                let yy = (y + dy).clamp(0, h - 1);
                let p = horiz[(yy * w + x) as usize];
                v = if take_max { v.max(p) } else { v.min(p) };
            }
            dest.set(x as usize, y as usize, v);
        }
    }
    Ok(())
}

/// Grey-level dilation with a `sz` × `sz` box.
pub fn box_max(dest: &mut Image, src: &Image, sz: usize) -> Result<()> {
    box_extreme(dest, src, sz, true)
}

/// Grey-level erosion with a `sz` × `sz` box.
pub fn box_min(dest: &mut Image, src: &Image, sz: usize) -> Result<()> {
    box_extreme(dest, src, sz, false)
}

/// Morphological closing (dilate then erode), fills gaps narrower than `sz`.
pub fn close(dest: &mut Image, src: &Image, sz: usize) -> Result<()> {
    let mut tmp = Image::like(src);
    tmp.set_roi(src.roi());
    box_max(&mut tmp, src, sz)?;
    box_min(dest, &tmp, sz)
}

/// Binary threshold: pixels at or above `th` become `ON`, others 0.
pub fn threshold(dest: &mut Image, src: &Image, th: u8) -> Result<()> {
    check_mono_pair(dest, src)?;
    let r = dest.joint_roi(&[src]);
    for y in r.y as usize..r.y1() as usize {
        for x in r.x as usize..r.x1() as usize {
            dest.set(x, y, if src.get(x, y) >= th { ON } else { 0 });
        }
    }
    Ok(())
}

/// 8-connected component labelling of pixels over `th` into a 16-bit label image.
/// Returns the number of labels plus one (label 0 is background), so the result can
/// size a `BBoxTable` directly.
pub fn label_components(labels: &mut Image, src: &Image, th: u8) -> Result<usize> {
    src.check_fields(1)?;
    if labels.fields() != 2 || !labels.same_size(src) {
        labels.set_size(src.width(), src.height(), 2);
        labels.set_roi(src.roi());
    }
    let r = labels.joint_roi(&[src]);
    labels.fill16(0);
    let mut next: u32 = 1;
    let mut stack: Vec<(i32, i32)> = Vec::new();
    for y in r.y..r.y1() {
        for x in r.x..r.x1() {
            if src.get(x as usize, y as usize) <= th || labels.get16(x as usize, y as usize) != 0 {
                continue;
            }
            if next > u16::MAX as u32 {
                log::warn!("label_components: more than {} components, rest unlabelled", u16::MAX);
                return Ok(next as usize);
            }
            let lab = next as u16;
            next += 1;
            labels.set16(x as usize, y as usize, lab);
            stack.push((x, y));
            while let Some((cx, cy)) = stack.pop() {
                for dy in -1..=1 {
                    for dx in -1..=1 {
                        let (nx, ny) = (cx + dx, cy + dy);
                        if !r.contains(nx, ny) {
                            continue;
                        }
                        let (ux, uy) = (nx as usize, ny as usize);
                        if src.get(ux, uy) > th && labels.get16(ux, uy) == 0 {
                            labels.set16(ux, uy, lab);
                            stack.push((nx, ny));
                        }
                    }
                }
            }
        }
    }
    Ok(next as usize)
}

/// Fill enclosed holes (4-connected background regions not touching the window edge)
/// whose area is at most `max_area`. Works in place on a binary mask.
pub fn fill_holes(mask: &mut Image, max_area: usize) -> Result<usize> {
    mask.check_fields(1)?;
    let r = mask.roi();
    let (w, h) = (r.w as usize, r.h as usize);
    let mut seen = vec![false; w * h];
    let idx = |x: i32, y: i32| ((y - r.y) as usize) * w + (x - r.x) as usize;
    let mut filled = 0;
    let mut region: Vec<(i32, i32)> = Vec::new();
    let mut stack: Vec<(i32, i32)> = Vec::new();
    for y in r.y..r.y1() {
        for x in r.x..r.x1() {
            if seen[idx(x, y)] || mask.get(x as usize, y as usize) != 0 {
                continue;
            }
            region.clear();
            let mut touches = false;
            seen[idx(x, y)] = true;
            stack.push((x, y));
            while let Some((cx, cy)) = stack.pop() {
                region.push((cx, cy));
                if cx == r.x || cy == r.y || cx == r.x1() - 1 || cy == r.y1() - 1 {
                    touches = true;
                }
                for (dx, dy) in [(1, 0), (-1, 0), (0, 1), (0, -1)] {
                    let (nx, ny) = (cx + dx, cy + dy);
                    if r.contains(nx, ny)
                        && !seen[idx(nx, ny)]
                        && mask.get(nx as usize, ny as usize) == 0
                    {
                        seen[idx(nx, ny)] = true;
                        stack.push((nx, ny));
                    }
                }
            }
            if !touches && region.len() <= max_area {
                for &(px, py) in &region {
                    mask.set(px as usize, py as usize, ON);
                }
                filled += region.len();
            }
        }
    }
    Ok(filled)
}

/// Weighted monochrome projection of a colour image.
pub fn mono(dest: &mut Image, src: &Image) -> Result<()> {
    dest.check_fields(1)?;
    if !dest.same_size(src) {
        return Err(Error::SizeMismatch { expected: dest.describe(), actual: src.describe() });
    }
    let r = dest.joint_roi(&[src]);
    for y in r.y as usize..r.y1() as usize {
        for x in r.x as usize..r.x1() as usize {
            dest.set(x, y, src.mono_at(x, y));
        }
    }
    Ok(())
}

/// Three orthogonal edge responses of a monochrome image packed as a 3-field image
/// (horizontal gradient, vertical gradient, diagonal cross term), each offset by 128.
pub fn triple_edge(dest: &mut Image, src: &Image) -> Result<()> {
    src.check_fields(1)?;
    if dest.fields() != 3 || !dest.same_size(src) {
        dest.set_size(src.width(), src.height(), 3);
    }
    let r = dest.joint_roi(&[src]);
    for y in r.y..r.y1() {
        for x in r.x..r.x1() {
            let p = |dx: i32, dy: i32| clamp_read(src, x + dx, y + dy) as i32;
            let gx = (p(1, -1) + 2 * p(1, 0) + p(1, 1)) - (p(-1, -1) + 2 * p(-1, 0) + p(-1, 1));
            let gy = (p(-1, 1) + 2 * p(0, 1) + p(1, 1)) - (p(-1, -1) + 2 * p(0, -1) + p(1, -1));
            let gd = (p(1, 1) + p(-1, -1)) - (p(1, -1) + p(-1, 1));
            let pack = |v: i32| (128 + v).clamp(0, 255) as u8;
            dest.set_bgr(x as usize, y as usize, [pack(gx / 8), pack(gy / 8), pack(gd / 4)]);
        }
    }
    Ok(())
}

/// Block-average down-sampling by an integer factor. `dest` is resized to fit.
pub fn sample_down(dest: &mut Image, src: &Image, factor: usize) -> Result<()> {
    if !src.is_valid() {
        return Err(Error::InvalidInput("sample_down: empty source".into()));
    }
    let f = factor.max(1);
    let (w, h) = (src.width() / f, src.height() / f);
    dest.set_size(w.max(1), h.max(1), src.fields());
    let n = (f * f) as u32;
    let nf = src.fields();
    for y in 0..dest.height() {
        for x in 0..dest.width() {
            let mut sums = [0u32; 3];
            for sy in y * f..((y + 1) * f).min(src.height()) {
                for sx in x * f..((x + 1) * f).min(src.width()) {
                    for (c, s) in sums.iter_mut().enumerate().take(nf) {
                        *s += src.field(sx, sy, c) as u32;
                    }
                }
            }
            let off = dest.offset(x, y);
            for (c, s) in sums.iter().enumerate().take(nf) {
                dest.data_mut()[off + c] = ((s + n / 2) / n) as u8;
            }
        }
    }
    Ok(())
}

/// Nearest-neighbour resize of any field count to the size of `dest`.
pub fn resize_nearest(dest: &mut Image, src: &Image) -> Result<()> {
    if dest.fields() != src.fields() {
        return Err(Error::SizeMismatch { expected: dest.describe(), actual: src.describe() });
    }
    let nf = src.fields();
    for y in 0..dest.height() {
        let sy = (y * src.height()) / dest.height().max(1);
        for x in 0..dest.width() {
            let sx = (x * src.width()) / dest.width().max(1);
            let s = src.offset(sx, sy);
            let d = dest.offset(x, y);
            for c in 0..nf {
                let v = src.data()[s + c];
                dest.data_mut()[d + c] = v;
            }
        }
    }
    Ok(())
}

/// Rotation by a multiple of 90 degrees (counter-clockwise). `dest` is resized.
pub fn rotate_quarter(dest: &mut Image, src: &Image, quarters: i32) -> Result<()> {
    if !src.is_valid() {
        return Err(Error::InvalidInput("rotate_quarter: empty source".into()));
    }
    let q = quarters.rem_euclid(4);
    let (w, h) = (src.width(), src.height());
    if q % 2 == 1 {
        dest.set_size(h, w, src.fields());
    } else {
        dest.set_size(w, h, src.fields());
    }
    let nf = src.fields();
    for y in 0..h {
        for x in 0..w {
            let (dx, dy) = match q {
                0 => (x, y),
                1 => (h - 1 - y, x),
                2 => (w - 1 - x, h - 1 - y),
                _ => (y, w - 1 - x),
            };
            let s = src.offset(x, y);
            let d = dest.offset(dx, dy);
            for c in 0..nf {
                let v = src.data()[s + c];
                dest.data_mut()[d + c] = v;
            }
        }
    }
    Ok(())
}

/// Bilinear sample of field `c` at a real-valued location (clamped at the border).
pub fn bilinear(src: &Image, fx: f64, fy: f64, c: usize) -> f64 {
    let (w, h) = (src.width() as i32, src.height() as i32);
    let x0 = fx.floor() as i32;
    let y0 = fy.floor() as i32;
    let (ax, ay) = (fx - x0 as f64, fy - y0 as f64);
    let rd = |x: i32, y: i32| {
        let cx = x.clamp(0, w - 1) as usize;
        let cy = y.clamp(0, h - 1) as usize;
        src.field(cx, cy, c) as f64
    };
    let top = rd(x0, y0) * (1.0 - ax) + rd(x0 + 1, y0) * ax;
    let bot = rd(x0, y0 + 1) * (1.0 - ax) + rd(x0 + 1, y0 + 1) * ax;
    top * (1.0 - ay) + bot * ay
}

/// Rotated crop: fills `dest` (whose size sets the crop size) from a window of `src`
/// centered at (cx, cy), rotated by `degs` counter-clockwise, with `scale` source pixels
/// per destination pixel. Pixels that fall outside `src` are zeroed.
pub fn rotated_crop(dest: &mut Image, src: &Image, cx: f64, cy: f64, degs: f64, scale: f64) -> Result<()> {
    if dest.fields() != src.fields() {
        return Err(Error::SizeMismatch { expected: dest.describe(), actual: src.describe() });
    }
    let (s, c) = degs.to_radians().sin_cos();
    let (hw, hh) = (0.5 * dest.width() as f64, 0.5 * dest.height() as f64);
    let nf = src.fields();
    for y in 0..dest.height() {
        for x in 0..dest.width() {
            let (u, v) = ((x as f64 + 0.5 - hw) * scale, (y as f64 + 0.5 - hh) * scale);
            let sx = cx + u * c - v * s;
            let sy = cy + u * s + v * c;
            let d = dest.offset(x, y);
            let inside = sx >= 0.0 && sy >= 0.0 && sx < src.width() as f64 && sy < src.height() as f64;
            for ch in 0..nf {
                let val = if inside { bilinear(src, sx - 0.5, sy - 0.5, ch).round() as u8 } else { 0 };
                dest.data_mut()[d + ch] = val;
            }
        }
    }
    Ok(())
}

/// Count non-zero pixels of a mono image inside an area (clipped to the image window).
pub fn count_in(img: &Image, area: &Roi) -> usize {
    let r = img.roi().overlap(area);
    let mut n = 0;
    for y in r.y as usize..r.y1() as usize {
        for x in r.x as usize..r.x1() as usize {
            if img.get(x, y) != 0 {
                n += 1;
            }
        }
    }
    n
}
