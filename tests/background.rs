use depth_scene::core_modules::background::{BgStatus, BgSubtractor, FgEvent, FG, RED};
use depth_scene::core_modules::image::Image;
use depth_scene::core_modules::roi::Roi;

struct Noise(u32);

impl Noise {
    fn next(&mut self) -> i32 {
        self.0 = self.0.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        ((self.0 >> 16) % 5) as i32 - 2
    }
}

/// 640x480 textured room with an optional flat-coloured patch.
fn frame(noise: &mut Noise, patch: Option<(Roi, [u8; 3])>) -> Image {
    let mut img = Image::new(640, 480, 3);
    for y in 0..480 {
        for x in 0..640 {
            let base = (((x / 8) * 37 + (y / 8) * 91) % 160 + 40) as i32;
            let mut px = [base as u8, (base / 2 + 60) as u8, (220 - base) as u8];
            if let Some((r, c)) = patch {
                if r.contains(x as i32, y as i32) {
                    px = c;
                }
            }
            for v in &mut px {
                *v = (*v as i32 + noise.next()).clamp(0, 255) as u8;
            }
            img.set_bgr(x, y, px);
        }
    }
    img
}

fn primed(noise: &mut Noise) -> BgSubtractor {
    let mut bg = BgSubtractor::default();
    for _ in 0..40 {
        bg.find_fg(&frame(noise, None)).unwrap();
    }
    assert_eq!(bg.status(), BgStatus::Ready);
    bg
}

#[test]
fn knocked_camera_relearns() {
    let mut noise = Noise(21);
    let mut bg = primed(&mut noise);
    let cover = Some((Roi::new(0, 0, 608, 480), [230, 200, 90]));

    let mut reset_at = None;
    for k in 1..=40 {
        if bg.find_fg(&frame(&mut noise, cover)).unwrap() == FgEvent::Reset {
            reset_at = Some(k);
            break;
        }
    }
    let k = reset_at.expect("knock should reset the model");
    assert!(k <= bg.ps.still + 1, "reset after {} frames", k);
    assert_eq!(bg.status(), BgStatus::Learning);

    // the new view becomes the background
    for _ in 0..bg.ps.bcnt {
        assert_ne!(bg.find_fg(&frame(&mut noise, cover)).unwrap(), FgEvent::Reset);
    }
    assert_eq!(bg.status(), BgStatus::Ready);
    assert!(bg.fg_fraction() < 0.01);
}

/// Show a parked object until the model proposes it for healing.
fn park_until_proposed(bg: &mut BgSubtractor, noise: &mut Noise, obj: Option<(Roi, [u8; 3])>) -> bool {
    for k in 0..(bg.ps.stable + 40) {
        bg.find_fg(&frame(noise, obj)).unwrap();
        if bg.mask().get(70, 55) == RED {
            return true;
        }
        if k == 10 {
            assert_eq!(bg.mask().get(70, 55), FG);
        }
    }
    false
}

#[test]
fn parked_object_is_healed_into_background() {
    let mut noise = Noise(8);
    let mut bg = primed(&mut noise);
    let obj = Some((Roi::new(200, 160, 160, 120), [250, 250, 250]));

    assert!(park_until_proposed(&mut bg, &mut noise, obj), "object never proposed for healing");
    assert_eq!(bg.heal_list().len(), 1);
    assert!(bg.heal_list()[0].bbox.contains(70, 55));

    assert_eq!(bg.find_fg(&frame(&mut noise, obj)).unwrap(), FgEvent::Healed);
    assert_eq!(bg.mask().get(70, 55), 0);
    assert!(bg.fg_fraction() < 0.01);
}

#[test]
fn large_parked_object_is_not_a_knock() {
    let mut noise = Noise(34);
    let mut bg = primed(&mut noise);
    // a fifth of the view
    let obj = Some((Roi::new(176, 128, 280, 224), [250, 250, 250]));

    let mut proposed = false;
    for k in 0..(bg.ps.stable + 40) {
        let ev = bg.find_fg(&frame(&mut noise, obj)).unwrap();
        assert_ne!(ev, FgEvent::Reset, "frame {}", k);
        assert!(bg.fg_fraction() < bg.ps.maxfg, "frame {} fg {}", k, bg.fg_fraction());
        if k >= 10 {
            assert!(bg.fg_fraction() > 0.1, "frame {} fg {}", k, bg.fg_fraction());
        }
        if bg.mask().get(70, 55) == RED {
            proposed = true;
            break;
        }
    }
    assert!(proposed, "object never proposed for healing");
    assert_eq!(bg.find_fg(&frame(&mut noise, obj)).unwrap(), FgEvent::Healed);
    assert!(bg.fg_fraction() < 0.01);
}

#[test]
fn vetoed_heal_stays_foreground() {
    let mut noise = Noise(13);
    let mut bg = primed(&mut noise);
    let obj = Some((Roi::new(200, 160, 160, 120), [250, 250, 250]));

    assert!(park_until_proposed(&mut bg, &mut noise, obj));
    let id = bg.heal_list()[0].id;
    assert!(bg.veto_heal(id));
    assert!(!bg.veto_heal(id));
    assert_eq!(bg.mask().get(70, 55), FG);

    for _ in 0..5 {
        assert_eq!(bg.find_fg(&frame(&mut noise, obj)).unwrap(), FgEvent::Normal);
        assert_eq!(bg.mask().get(70, 55), FG);
    }
}
