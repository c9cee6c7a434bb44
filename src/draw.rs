// Software drawing utilities.
// Two kinds of target:
// 1) The canvas (`RgbImage`): thick brush lines with round caps.
// 2) The window buffer (`FrameBuffer`): crosshair, hand markers and 5x7 HUD text.

use image::{Rgb, RgbImage};

use crate::types::{FrameBuffer, HandLandmarks, Point};

/// Walk the pixels of a Bresenham line from (x0,y0) to (x1,y1), both ends included.
/// Error terms are kept in i64 so far-apart endpoints cannot overflow.
fn bresenham(x0: i32, y0: i32, x1: i32, y1: i32, mut plot: impl FnMut(i32, i32)) {
    let (mut x, mut y) = (x0 as i64, y0 as i64);
    let (x1, y1) = (x1 as i64, y1 as i64);
    let dx = (x1 - x).abs();
    let sx = if x < x1 { 1 } else { -1 };
    let dy = -(y1 - y).abs();
    let sy = if y < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        plot(x as i32, y as i32);
        if x == x1 && y == y1 { break; }
        let e2 = 2 * err;
        if e2 >= dy { err += dy; x += sx; }
        if e2 <= dx { err += dx; y += sy; }
    }
}

/// Liang-Barsky: the parameter range `t0..=t1` of segment a→b that lies in the
/// box `lo..=hi`, or `None`. Non-finite input never intersects.
fn clip_segment(a: (f64, f64), b: (f64, f64), lo: (f64, f64), hi: (f64, f64)) -> Option<(f64, f64)> {
    if ![a.0, a.1, b.0, b.1].iter().all(|v| v.is_finite()) {
        return None;
    }
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let (mut t0, mut t1) = (0.0f64, 1.0f64);
    for (p, q) in [(-dx, a.0 - lo.0), (dx, hi.0 - a.0), (-dy, a.1 - lo.1), (dy, hi.1 - a.1)] {
        if p == 0.0 {
            if q < 0.0 { return None; }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            if r > t1 { return None; }
            t0 = t0.max(r);
        } else {
            if r < t0 { return None; }
            t1 = t1.min(r);
        }
    }
    Some((t0, t1))
}

/* ---------- Canvas raster ---------- */

/// Fill a disc of `radius` centered at (cx,cy), clipped to the image.
pub fn stamp_disc(img: &mut RgbImage, cx: i32, cy: i32, radius: i32, color: Rgb<u8>) {
    let (w, h) = (img.width() as i32, img.height() as i32);
    let r2 = radius * radius;
    for dy in -radius..=radius {
        let y = cy.saturating_add(dy);
        if y < 0 || y >= h { continue; }
        for dx in -radius..=radius {
            let x = cx.saturating_add(dx);
            if x < 0 || x >= w || dx * dx + dy * dy > r2 { continue; }
            img.put_pixel(x as u32, y as u32, color);
        }
    }
}

/// Brush line of `thickness` pixels with round caps. Only the part that can
/// reach the image is walked.
pub fn draw_thick_line(img: &mut RgbImage, from: (i32, i32), to: (i32, i32), color: Rgb<u8>, thickness: u32) {
    draw_clipped(img, (from.0 as f64, from.1 as f64), (to.0 as f64, to.1 as f64), color, thickness);
}

/// Connect consecutive points with brush lines. Coordinates are truncated to pixels.
pub fn draw_polyline(img: &mut RgbImage, points: &[Point], color: Rgb<u8>, thickness: u32) {
    for pair in points.windows(2) {
        let a = (pair[0].x as f64, pair[0].y as f64);
        let b = (pair[1].x as f64, pair[1].y as f64);
        draw_clipped(img, a, b, color, thickness);
    }
}

fn draw_clipped(img: &mut RgbImage, a: (f64, f64), b: (f64, f64), color: Rgb<u8>, thickness: u32) {
    let radius = (thickness.max(1) / 2) as i32;
    let r = radius as f64;
    let lo = (-r, -r);
    let hi = (img.width() as f64 - 1.0 + r, img.height() as f64 - 1.0 + r);
    let Some((t0, t1)) = clip_segment(a, b, lo, hi) else {
        return;
    };
    // Untouched ends truncate like any other point; cut ends round to the box edge.
    let at = |t: f64| {
        if t == 0.0 {
            (a.0 as i32, a.1 as i32)
        } else if t == 1.0 {
            (b.0 as i32, b.1 as i32)
        } else {
            ((a.0 + t * (b.0 - a.0)).round() as i32, (a.1 + t * (b.1 - a.1)).round() as i32)
        }
    };
    let (p, q) = (at(t0), at(t1));
    bresenham(p.0, p.1, q.0, q.1, |x, y| stamp_disc(img, x, y, radius, color));
}

/* ---------- Window buffer: pixels, crosshair, hand markers ---------- */

/// Put a pixel on the framebuffer if (x,y) is inside bounds.
#[inline]
pub fn put_pixel(fb: &mut FrameBuffer, x: i32, y: i32, color: u32) {
    if x < 0 || y < 0 {
        return;
    }
    let (x, y) = (x as usize, y as usize);
    if x >= fb.width || y >= fb.height {
        return;
    }
    let idx = y * fb.width + x;
    fb.pixels[idx] = color;
}

/// Thin 1-pixel line.
pub fn draw_line(fb: &mut FrameBuffer, x0: i32, y0: i32, x1: i32, y1: i32, color: u32) {
    bresenham(x0, y0, x1, y1, |x, y| put_pixel(fb, x, y, color));
}

/// A "+" with a small gap at the center.
pub fn draw_crosshair(fb: &mut FrameBuffer, cx: i32, cy: i32, size: i32, color: u32) {
    draw_line(fb, cx - size, cy, cx - 2, cy, color);
    draw_line(fb, cx + 2, cy, cx + size, cy, color);
    draw_line(fb, cx, cy - size, cx, cy - 2, color);
    draw_line(fb, cx, cy + 2, cx, cy + size, color);
    put_pixel(fb, cx, cy, color);
}

/// Filled square of side 2*half+1.
pub fn fill_square(fb: &mut FrameBuffer, cx: i32, cy: i32, half: i32, color: u32) {
    for y in cy - half..=cy + half {
        for x in cx - half..=cx + half {
            put_pixel(fb, x, y, color);
        }
    }
}

/// Mark each landmark, scaled from source frame pixels to the buffer.
pub fn draw_hand(fb: &mut FrameBuffer, hand: &HandLandmarks, frame_size: (u32, u32), color: u32) {
    let sx = fb.width as f32 / frame_size.0.max(1) as f32;
    let sy = fb.height as f32 / frame_size.1.max(1) as f32;
    for lm in hand.points() {
        fill_square(fb, (lm.x as f32 * sx) as i32, (lm.y as f32 * sy) as i32, 2, color);
    }
}

/* ---------- 5x7 bitmap font ---------- */

/// Return a 5x7 glyph bitmap. Lowercase letters render as uppercase.
/// Each u8 is a row; the low 5 bits are the pixels (bit 4 = leftmost).
fn glyph5x7(ch: char) -> Option<[u8; 7]> {
    macro_rules! g { ($a:expr,$b:expr,$c:expr,$d:expr,$e:expr,$f:expr,$g:expr) => {
        Some([$a,$b,$c,$d,$e,$f,$g])
    }; }

    match ch.to_ascii_uppercase() {
        '0' => g!(0b01110,0b10001,0b10011,0b10101,0b11001,0b10001,0b01110),
        '1' => g!(0b00100,0b01100,0b00100,0b00100,0b00100,0b00100,0b01110),
        '2' => g!(0b01110,0b10001,0b00001,0b00010,0b00100,0b01000,0b11111),
        '3' => g!(0b11110,0b00001,0b00001,0b01110,0b00001,0b00001,0b11110),
        '4' => g!(0b00010,0b00110,0b01010,0b10010,0b11111,0b00010,0b00010),
        '5' => g!(0b11111,0b10000,0b11110,0b00001,0b00001,0b10001,0b01110),
        '6' => g!(0b00110,0b01000,0b10000,0b11110,0b10001,0b10001,0b01110),
        '7' => g!(0b11111,0b00001,0b00010,0b00100,0b01000,0b01000,0b01000),
        '8' => g!(0b01110,0b10001,0b10001,0b01110,0b10001,0b10001,0b01110),
        '9' => g!(0b01110,0b10001,0b10001,0b01111,0b00001,0b00010,0b01100),

        'A' => g!(0b01110,0b10001,0b10001,0b11111,0b10001,0b10001,0b10001),
        'B' => g!(0b11110,0b10001,0b10001,0b11110,0b10001,0b10001,0b11110),
        'C' => g!(0b01110,0b10001,0b10000,0b10000,0b10000,0b10001,0b01110),
        'D' => g!(0b11100,0b10010,0b10001,0b10001,0b10001,0b10010,0b11100),
        'E' => g!(0b11111,0b10000,0b10000,0b11110,0b10000,0b10000,0b11111),
        'F' => g!(0b11111,0b10000,0b10000,0b11110,0b10000,0b10000,0b10000),
        'G' => g!(0b01110,0b10001,0b10000,0b10111,0b10001,0b10001,0b01111),
        'H' => g!(0b10001,0b10001,0b10001,0b11111,0b10001,0b10001,0b10001),
        'I' => g!(0b01110,0b00100,0b00100,0b00100,0b00100,0b00100,0b01110),
        'J' => g!(0b00111,0b00010,0b00010,0b00010,0b00010,0b10010,0b01100),
        'K' => g!(0b10001,0b10010,0b10100,0b11000,0b10100,0b10010,0b10001),
        'L' => g!(0b10000,0b10000,0b10000,0b10000,0b10000,0b10000,0b11111),
        'M' => g!(0b10001,0b11011,0b10101,0b10101,0b10001,0b10001,0b10001),
        'N' => g!(0b10001,0b10001,0b11001,0b10101,0b10011,0b10001,0b10001),
        'O' => g!(0b01110,0b10001,0b10001,0b10001,0b10001,0b10001,0b01110),
        'P' => g!(0b11110,0b10001,0b10001,0b11110,0b10000,0b10000,0b10000),
        'Q' => g!(0b01110,0b10001,0b10001,0b10001,0b10101,0b10010,0b01101),
        'R' => g!(0b11110,0b10001,0b10001,0b11110,0b10100,0b10010,0b10001),
        'S' => g!(0b01111,0b10000,0b10000,0b01110,0b00001,0b00001,0b11110),
        'T' => g!(0b11111,0b00100,0b00100,0b00100,0b00100,0b00100,0b00100),
        'U' => g!(0b10001,0b10001,0b10001,0b10001,0b10001,0b10001,0b01110),
        'V' => g!(0b10001,0b10001,0b10001,0b10001,0b10001,0b01010,0b00100),
        'W' => g!(0b10001,0b10001,0b10001,0b10101,0b10101,0b10101,0b01010),
        'X' => g!(0b10001,0b10001,0b01010,0b00100,0b01010,0b10001,0b10001),
        'Y' => g!(0b10001,0b10001,0b01010,0b00100,0b00100,0b00100,0b00100),
        'Z' => g!(0b11111,0b00001,0b00010,0b00100,0b01000,0b10000,0b11111),

        ' ' => g!(0b00000,0b00000,0b00000,0b00000,0b00000,0b00000,0b00000),
        '|' => g!(0b00100,0b00100,0b00100,0b00100,0b00100,0b00100,0b00100),
        ':' => g!(0b00000,0b00100,0b00000,0b00000,0b00100,0b00000,0b00000),
        '.' => g!(0b00000,0b00000,0b00000,0b00000,0b00000,0b00100,0b00000),
        '_' => g!(0b00000,0b00000,0b00000,0b00000,0b00000,0b00000,0b11111),
        '-' => g!(0b00000,0b00000,0b00000,0b11111,0b00000,0b00000,0b00000),
        '/' => g!(0b00001,0b00001,0b00010,0b00100,0b01000,0b10000,0b10000),
        '#' => g!(0b01010,0b01010,0b11111,0b01010,0b11111,0b01010,0b01010),

        _ => None,
    }
}

/// Draw a single 5x7 character at (x,y) with a 1-pixel black shadow.
fn draw_char_5x7(fb: &mut FrameBuffer, x: i32, y: i32, ch: char, color: u32) {
    let Some(rows) = glyph5x7(ch) else { return };
    for (offset, c) in [(1, 0x00000000), (0, color)] {
        for (ry, rowbits) in rows.iter().enumerate() {
            for rx in 0..5 {
                if (rowbits & (1 << (4 - rx))) != 0 {
                    put_pixel(fb, x + rx + offset, y + ry as i32 + offset, c);
                }
            }
        }
    }
}

/// Draw a text string using 5x7 glyphs, 1 pixel apart.
pub fn draw_text_5x7(fb: &mut FrameBuffer, mut x: i32, y: i32, text: &str, color: u32) {
    for ch in text.chars() {
        draw_char_5x7(fb, x, y, ch, color);
        x += 6;
    }
}
