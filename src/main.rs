// Example runner for the `depth_scene` library: a synthetic two-camera rig looking down
// at a floor with one standing person, run through the navigation service.

use depth_scene::core_modules::camera::CameraRecord;
use depth_scene::core_modules::image::Image;
use depth_scene::{FrameSet, NavConfig, NavPipeline, NavService};
use env_logger::Env;

const FOCAL: f64 = 525.0;
const UNITS_PER_INCH: f64 = 101.6;

/// Depth frame of a camera at (cx, cy, 100) looking straight down at a floor, with a
/// person (shoulders at 52 in, head at 64 in) standing at (px, py).
fn depth_view(cx: f64, cy: f64, px: f64, py: f64) -> Image {
    let mut d = Image::new(640, 480, 2);
    let boxes = [(0.0, 100.0, 0.0), (7.0, 5.0, 52.0), (3.0, 3.0, 64.0)];
    for v in 0..480 {
        for u in 0..640 {
            let mut raw = 0;
            for &(hx, hy, h) in &boxes {
                let dist = 100.0 - h;
                let wx = cx + (u as f64 - 319.5) * dist / FOCAL;
                let wy = cy + (v as f64 - 239.5) * dist / FOCAL;
                let (ox, oy) = if h > 0.0 { (px, py) } else { (wx, wy) };
                if h == 0.0 || ((wx - ox).abs() <= hx && (wy - oy).abs() <= hy) {
                    raw = (dist * UNITS_PER_INCH) as u16;
                }
            }
            d.set16(u, v, raw);
        }
    }
    d
}

#[tokio::main]
async fn main() -> depth_scene::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    println!("depth_scene - example runner");

    let mut nav = NavPipeline::new(NavConfig::default());
    let cams = [(-40.0, 70.0), (40.0, 70.0)];
    for (n, &(x, y)) in cams.iter().enumerate() {
        nav.set_cam(n, CameraRecord::new(n as i32, [x, y, 100.0], 0.0, -90.0, 0.0))?;
    }
    let (svc, handle) = NavService::spawn(nav, 4);

    for step in 0..8 {
        let (px, py) = (-20.0 + 5.0 * step as f64, 80.0);
        let depth = cams.iter().enumerate().map(|(n, &(x, y))| (n, depth_view(x, y, px, py))).collect();
        let report = svc.process(FrameSet { depth, color: Vec::new() }).await?;
        println!(
            "frame {}: {} people, obstacle {:?}, follow {:?}",
            report.frame,
            report.people.len(),
            report.obstacle.map(|d| format!("{:.1} in", d)),
            report.follow.map(|f| format!("id {} at {:.1} deg, {:.1} in", f.id, f.heading, f.range))
        );
    }

    svc.shutdown().await;
    let _ = handle.await;
    Ok(())
}
