// What you SEE:
// • The canvas fills the window. A hand skeleton and crosshair follow the mouse.
// • Hold Left Mouse: the pointer is a POINTING hand, so you draw.
// • Right Mouse: PINCH (undo). Hold Space: OPEN_PALM (held 1 s clears).
// • Mouse released: a FIST hovering over the canvas (stroke ends).
// • Keys: 1-5 pick a style, G generates, U/R undo/redo, C clear, P pause tracking, ESC quits.
// • The latest generated image shows as an inset in the bottom-right corner.
//
// Usage: gesture-canvas [--camera] [settings.json]

mod window;

use std::env;
use std::time::{Duration, Instant};

use gesture_canvas::config::Config;
use gesture_canvas::coordinator::RequestId;
use gesture_canvas::draw::{draw_crosshair, draw_hand, draw_text_5x7};
use gesture_canvas::error::Error;
use gesture_canvas::gesture::poses;
use gesture_canvas::landmarks::ManualProvider;
use gesture_canvas::session::{ResultStatus, Session, Submission};
use gesture_canvas::style::{PreviewStylizer, STYLE_PRESETS};
use gesture_canvas::types::{FrameBuffer, GestureKind, pack_rgb};
use image::RgbImage;
use image::imageops::{self, FilterType};
use minifb::Key;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use window::Drawer;

const STYLE_KEYS: [Key; 5] = [Key::Key1, Key::Key2, Key::Key3, Key::Key4, Key::Key5];

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    /* --- Settings ---
       Without --camera the capture worker runs on blank synthetic frames;
       the mouse stands in for the hand either way. */
    let mut use_camera = false;
    let mut config = Config::default();
    for arg in env::args().skip(1) {
        if arg == "--camera" {
            use_camera = true;
        } else {
            config = Config::load(&arg)?;
        }
    }
    config.capture.synthetic = !use_camera;

    let (win_w, win_h) = config.canvas.display_size;
    let (frame_w, frame_h) = (config.capture.width as f32, config.capture.height as f32);
    let aspect = config.canvas.aspect_correction;

    /* --- Session + workers --- */
    let mut session = Session::new(config)?;
    let hand = ManualProvider::new();
    session.start_camera(hand.clone())?;
    session.start_generation(PreviewStylizer::new())?;

    let mut drawer = Drawer::new("Gesture Canvas", win_w as usize, win_h as usize)?;

    let mut style_idx = 0usize;
    let mut pending: Option<RequestId> = None;
    let mut inset: Option<RgbImage> = None;
    let mut status_line = String::from("READY");

    let mut last_fps_time = Instant::now();
    let mut frames_this_second: u32 = 0;
    let mut hud_fps_text = String::from("FPS: 0.0");

    /* ------------------------------ Main loop ------------------------------ */
    while drawer.is_open() && !drawer.esc_pressed() {
        let now = Instant::now();

        /* 1) Pointer → synthetic hand in source-frame pixels.
           Inverse of the canvas mapping, so strokes land under the cursor. */
        let mouse = drawer.mouse_pos();
        match mouse {
            Some((mx, my)) => {
                let sx = (mx as f32 / win_w as f32 * frame_w) as i32;
                let sy = (my as f32 / win_h as f32 * frame_h / aspect) as i32;
                let pose = if drawer.right_mouse_down() {
                    poses::pinch()
                } else if drawer.key_down(Key::Space) {
                    poses::open_palm()
                } else if drawer.left_mouse_down() {
                    poses::pointing_at(sx, sy)
                } else {
                    poses::fist()
                };
                hand.set_hand(pose);
            }
            None => hand.clear(),
        }

        /* 2) Commands */
        for (i, key) in STYLE_KEYS.iter().enumerate() {
            if drawer.pressed_once(*key) {
                style_idx = i;
                status_line = format!("STYLE: {}", STYLE_PRESETS[i].key);
            }
        }
        if drawer.pressed_once(Key::U) { session.undo(); }
        if drawer.pressed_once(Key::R) { session.redo(); }
        if drawer.pressed_once(Key::C) { session.clear(); }
        if drawer.pressed_once(Key::P) {
            if session.coordinator().is_tracking() { session.pause_tracking(); } else { session.resume_tracking(); }
        }
        if drawer.pressed_once(Key::G) {
            match session.generate(STYLE_PRESETS[style_idx].key)? {
                Submission::Queued { id, position } => {
                    pending = Some(id);
                    status_line = format!("QUEUED #{position}");
                }
                Submission::QueueFull => status_line = String::from("QUEUE FULL"),
            }
        }

        /* 3) Consume the newest gesture. */
        session.tick(now);

        /* 4) Poll the outstanding generation. */
        if let Some(id) = pending {
            match session.result(id) {
                ResultStatus::Complete(result) => {
                    match &result.outcome {
                        Ok(img) => {
                            info!(%id, ms = result.metadata.generation_time.as_millis() as u64, "styled image ready");
                            inset = Some(img.clone());
                            status_line = format!("DONE: {}", result.metadata.style);
                        }
                        Err(e) => {
                            warn!(%id, error = %e, "generation failed");
                            status_line = String::from("GENERATION FAILED");
                        }
                    }
                    pending = None;
                }
                ResultStatus::Queued { position: 0 } => status_line = String::from("GENERATING..."),
                ResultStatus::Queued { position } => status_line = format!("QUEUED #{position}"),
                ResultStatus::NotFound => pending = None,
            }
        }
        for e in session.errors() {
            error!(worker = %e.worker, message = %e.message, "worker error");
            status_line = format!("ERROR: {}", e.worker);
        }

        /* 5) Compose: canvas, inset, hand, crosshair, HUD. */
        let mut screen = session.canvas().to_frame_buffer();
        if let Some(img) = &inset {
            blit(&mut screen, img, win_w / 4);
        }

        let gesture = session.gesture();
        if let Some(lm) = &gesture.landmarks {
            draw_hand(&mut screen, lm, gesture.frame_size, 0x00_88_88_88);
        }
        if let Some((mx, my)) = mouse {
            // White is invisible on the default background.
            let color = match gesture.gesture {
                GestureKind::None | GestureKind::Unknown => 0x00_80_80_80,
                g => g.color(),
            };
            draw_crosshair(&mut screen, mx as i32, my as i32, 12, color);
        }

        let tracking = if session.coordinator().is_tracking() { "" } else { " | PAUSED" };
        let stats = session.stats();
        let hud = format!(
            "{} | {} | QUEUE: {} | {}{}",
            display_name(gesture.gesture),
            hud_fps_text,
            stats.queue_len,
            status_line,
            tracking
        );
        draw_text_5x7(&mut screen, 8, 8, &hud, 0x00_33_33_33);

        drawer.present(&screen)?;

        /* 6) FPS counter (HUD, once per second) */
        frames_this_second += 1;
        if now.duration_since(last_fps_time) >= Duration::from_secs(1) {
            let secs = now.duration_since(last_fps_time).as_secs_f32();
            hud_fps_text = format!("FPS: {:.1}", frames_this_second as f32 / secs);
            frames_this_second = 0;
            last_fps_time = now;
        }
    }

    let report = session.stop();
    info!(joined = report.joined.len(), abandoned = report.abandoned.len(), "bye");
    Ok(())
}

fn display_name(g: GestureKind) -> &'static str {
    match g {
        GestureKind::None => "NO HAND",
        other => other.as_str(),
    }
}

/// Draw `img` scaled to `side` px wide in the bottom-right corner.
fn blit(fb: &mut FrameBuffer, img: &RgbImage, side: u32) {
    let h = (side as f32 * img.height() as f32 / img.width().max(1) as f32) as u32;
    let thumb = imageops::resize(img, side, h.max(1), FilterType::Triangle);
    let ox = fb.width.saturating_sub(side as usize + 8);
    let oy = fb.height.saturating_sub(thumb.height() as usize + 8);
    for (x, y, px) in thumb.enumerate_pixels() {
        let (fx, fy) = (ox + x as usize, oy + y as usize);
        if fx < fb.width && fy < fb.height {
            fb.pixels[fy * fb.width + fx] = pack_rgb(*px);
        }
    }
}
