// Catmull-Rom smoothing for stroke points.
//
// The curve passes through every control point. The first and last points are
// duplicated as outer neighbours, so N points give N-1 segments of `segments`
// steps each. Two points are interpolated linearly.

use crate::types::Point;

/// Smooth curve through `points`, `segments` sub-steps per span.
///
/// Output holds `(N - 1) * segments + 1` points for N >= 2; shorter inputs are
/// returned as-is. The first and last inputs appear unchanged at both ends.
pub fn interpolate(points: &[Point], segments: usize) -> Vec<Point> {
    let segments = segments.max(1);
    match points.len() {
        0 | 1 => points.to_vec(),
        2 => linear(points[0], points[1], segments),
        n => {
            let mut out = Vec::with_capacity((n - 1) * segments + 1);
            for i in 0..n - 1 {
                let p0 = points[i.saturating_sub(1)];
                let p1 = points[i];
                let p2 = points[i + 1];
                let p3 = points[(i + 2).min(n - 1)];
                // Last sample of each span is the next span's first.
                for s in 0..segments {
                    out.push(catmull_rom(p0, p1, p2, p3, s as f32 / segments as f32));
                }
            }
            out.push(points[n - 1]);
            out
        }
    }
}

/// Point at parameter `t` on the span p1..p2.
pub fn catmull_rom(p0: Point, p1: Point, p2: Point, p3: Point, t: f32) -> Point {
    let t2 = t * t;
    let t3 = t2 * t;
    let axis = |a: f32, b: f32, c: f32, d: f32| {
        0.5 * ((2.0 * b)
            + (-a + c) * t
            + (2.0 * a - 5.0 * b + 4.0 * c - d) * t2
            + (-a + 3.0 * b - 3.0 * c + d) * t3)
    };
    Point::new(axis(p0.x, p1.x, p2.x, p3.x), axis(p0.y, p1.y, p2.y, p3.y))
}

fn linear(a: Point, b: Point, segments: usize) -> Vec<Point> {
    (0..=segments)
        .map(|i| {
            let t = i as f32 / segments as f32;
            Point::new(a.x + (b.x - a.x) * t, a.y + (b.y - a.y) * t)
        })
        .collect()
}
