// Drawing surface driven by gestures.
//
// The canvas keeps one buffer at model resolution; the display view is a
// resized copy made on demand. A stroke is `start_stroke` → `add_point`* →
// `end_stroke`. While stroking, each new point draws a short smoothed piece
// straight onto the live buffer for feedback. On `end_stroke` the whole
// stroke is smoothed again and drawn once onto a copy of the pre-stroke
// buffer, so the committed pixels never depend on the live pieces.

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use tracing::debug;

use crate::config::CanvasConfig;
use crate::draw::draw_polyline;
use crate::spline;
use crate::types::{FrameBuffer, Point, Stroke};
use crate::undo::UndoManager;

/// Points used for the live piece drawn on each `add_point`.
const LIVE_WINDOW: usize = 4;

/// Byte counts for the model buffer and the undo history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
    pub canvas_bytes: usize,
    pub undo_bytes: usize,
}

impl MemoryUsage {
    pub fn total(&self) -> usize {
        self.canvas_bytes + self.undo_bytes
    }
}

struct ActiveStroke {
    stroke: Stroke,
    before: RgbImage,
}

pub struct Canvas {
    buffer: RgbImage,
    active: Option<ActiveStroke>,
    undo: UndoManager,
    background: Rgb<u8>,
    brush_color: Rgb<u8>,
    brush_thickness: u32,
    spline_segments: usize,
    aspect_correction: f32,
    display_size: (u32, u32),
}

impl Canvas {
    pub fn new(cfg: &CanvasConfig) -> Self {
        let background = Rgb(cfg.background);
        Self {
            buffer: RgbImage::from_pixel(cfg.size.0, cfg.size.1, background),
            active: None,
            undo: UndoManager::new(cfg.max_history),
            background,
            brush_color: Rgb(cfg.brush_color),
            brush_thickness: cfg.brush_thickness.max(1),
            spline_segments: cfg.spline_segments.max(1),
            aspect_correction: cfg.aspect_correction,
            display_size: cfg.display_size,
        }
    }

    pub fn width(&self) -> u32 {
        self.buffer.width()
    }

    pub fn height(&self) -> u32 {
        self.buffer.height()
    }

    pub fn background(&self) -> Rgb<u8> {
        self.background
    }

    pub fn is_stroking(&self) -> bool {
        self.active.is_some()
    }

    /// Map a pixel position in a source frame to canvas pixels.
    ///
    /// Gestures rarely reach the bottom of the camera frame, so y is
    /// stretched by the aspect correction before clamping.
    pub fn gesture_to_canvas_coords(&self, src_x: i32, src_y: i32, src_frame_size: (u32, u32)) -> Point {
        let fw = src_frame_size.0.max(1) as f32;
        let fh = src_frame_size.1.max(1) as f32;
        let nx = (src_x as f32 / fw).clamp(0.0, 1.0);
        let ny = (src_y as f32 / fh * self.aspect_correction).clamp(0.0, 1.0);

        let max_x = (self.width() - 1) as f32;
        let max_y = (self.height() - 1) as f32;
        Point::new(
            (nx * self.width() as f32).floor().min(max_x),
            (ny * self.height() as f32).floor().min(max_y),
        )
    }

    pub fn start_stroke(&mut self, x: f32, y: f32) {
        if self.active.is_some() {
            self.end_stroke();
        }
        self.active = Some(ActiveStroke {
            stroke: Stroke::new(Point::new(x, y), self.brush_color, self.brush_thickness),
            before: self.buffer.clone(),
        });
    }

    pub fn add_point(&mut self, x: f32, y: f32) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        active.stroke.points.push(Point::new(x, y));

        let points = &active.stroke.points;
        if points.len() < 2 {
            return;
        }
        let recent = &points[points.len().saturating_sub(LIVE_WINDOW)..];
        let smooth = spline::interpolate(recent, self.spline_segments);
        // The newest span is always the last `segments + 1` samples.
        let newest = &smooth[smooth.len().saturating_sub(self.spline_segments + 1)..];
        draw_polyline(&mut self.buffer, newest, active.stroke.color, active.stroke.thickness);
    }

    /// Commit the running stroke. Returns whether an undo record was made.
    pub fn end_stroke(&mut self) -> bool {
        let Some(ActiveStroke { stroke, before }) = self.active.take() else {
            return false;
        };

        if stroke.points.len() < 2 {
            // A lone point leaves no mark.
            self.buffer = before;
            return false;
        }

        let smooth = spline::interpolate(&stroke.points, self.spline_segments);
        let mut committed = before.clone();
        draw_polyline(&mut committed, &smooth, stroke.color, stroke.thickness);

        let recorded = self.undo.record(&before, &committed);
        self.buffer = committed;
        debug!(
            points = stroke.points.len(),
            elapsed_ms = stroke.created_at.elapsed().as_millis() as u64,
            recorded,
            "stroke committed"
        );
        recorded
    }

    /// Fill with background. Recorded for undo when anything was drawn.
    pub fn clear(&mut self) {
        if self.active.is_some() {
            self.end_stroke();
        }
        let blank = RgbImage::from_pixel(self.width(), self.height(), self.background);
        self.undo.record(&self.buffer, &blank);
        self.buffer = blank;
    }

    pub fn undo(&mut self) -> bool {
        if self.active.is_some() {
            self.end_stroke();
        }
        self.undo.undo(&mut self.buffer)
    }

    pub fn redo(&mut self) -> bool {
        if self.active.is_some() {
            self.end_stroke();
        }
        self.undo.redo(&mut self.buffer)
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.undo.redo_len()
    }

    pub fn set_brush_color(&mut self, color: Rgb<u8>) {
        self.brush_color = color;
    }

    pub fn set_brush_thickness(&mut self, thickness: u32) {
        self.brush_thickness = thickness.max(1);
    }

    pub fn brush(&self) -> (Rgb<u8>, u32) {
        (self.brush_color, self.brush_thickness)
    }

    /// The live model-resolution buffer.
    pub fn buffer(&self) -> &RgbImage {
        &self.buffer
    }

    /// Independent copy of the model buffer, e.g. for a generation request.
    pub fn snapshot(&self) -> RgbImage {
        self.buffer.clone()
    }

    /// Buffer resized to the display size.
    pub fn display_buffer(&self) -> RgbImage {
        let (w, h) = self.display_size;
        imageops::resize(&self.buffer, w, h, FilterType::Triangle)
    }

    /// Display view packed for a window backend.
    pub fn to_frame_buffer(&self) -> FrameBuffer {
        FrameBuffer::from_rgb(&self.display_buffer())
    }

    pub fn memory_usage(&self) -> MemoryUsage {
        MemoryUsage {
            canvas_bytes: self.buffer.as_raw().len(),
            undo_bytes: self.undo.memory_usage(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> Canvas {
        Canvas::new(&CanvasConfig {
            size: (100, 100),
            display_size: (50, 40),
            ..Default::default()
        })
    }

    fn blank(c: &Canvas) -> RgbImage {
        RgbImage::from_pixel(c.width(), c.height(), c.background())
    }

    #[test]
    fn stroke_then_undo_restores_background() {
        let mut c = small();
        let original = blank(&c);

        c.start_stroke(10.0, 10.0);
        c.add_point(20.0, 20.0);
        c.add_point(30.0, 10.0);
        assert!(c.end_stroke());
        assert_ne!(*c.buffer(), original);

        let committed = c.snapshot();
        assert!(c.undo());
        assert_eq!(*c.buffer(), original);
        assert!(c.redo());
        assert_eq!(*c.buffer(), committed);
    }

    #[test]
    fn far_off_canvas_point_is_clipped() {
        let mut c = small();
        let ink = c.brush().0;
        c.start_stroke(10.0, 10.0);
        c.add_point(3.0e9, 10.0);
        assert!(c.end_stroke());
        assert_eq!(*c.buffer().get_pixel(10, 10), ink);
        assert_eq!(*c.buffer().get_pixel(99, 10), ink);
        assert_eq!(*c.buffer().get_pixel(50, 50), c.background());
    }

    #[test]
    fn committed_stroke_ignores_live_pieces() {
        let pts = [(10.0, 10.0), (40.0, 60.0), (70.0, 20.0), (90.0, 80.0), (20.0, 90.0)];

        let mut live = small();
        live.start_stroke(pts[0].0, pts[0].1);
        for (x, y) in &pts[1..] {
            live.add_point(*x, *y);
        }
        live.end_stroke();

        let stroke: Vec<Point> = pts.iter().map(|(x, y)| Point::new(*x, *y)).collect();
        let mut expected = blank(&live);
        let smooth = spline::interpolate(&stroke, 5);
        draw_polyline(&mut expected, &smooth, Rgb([0, 0, 0]), 3);

        assert_eq!(*live.buffer(), expected);
    }

    #[test]
    fn single_point_stroke_leaves_no_mark() {
        let mut c = small();
        c.start_stroke(50.0, 50.0);
        assert!(!c.end_stroke());
        assert_eq!(*c.buffer(), blank(&c));
        assert_eq!(c.undo_depth(), 0);
    }

    #[test]
    fn add_point_without_stroke_is_a_no_op() {
        let mut c = small();
        c.add_point(5.0, 5.0);
        assert_eq!(*c.buffer(), blank(&c));
        assert!(!c.is_stroking());
    }

    #[test]
    fn add_point_draws_live() {
        let mut c = small();
        c.start_stroke(10.0, 50.0);
        c.add_point(80.0, 50.0);
        assert_eq!(*c.buffer().get_pixel(45, 50), Rgb([0, 0, 0]));
    }

    #[test]
    fn restarting_a_stroke_commits_the_first() {
        let mut c = small();
        c.start_stroke(10.0, 10.0);
        c.add_point(20.0, 10.0);
        c.start_stroke(50.0, 50.0);
        assert_eq!(c.undo_depth(), 1);
        assert!(c.is_stroking());
    }

    #[test]
    fn clear_is_undoable() {
        let mut c = small();
        c.start_stroke(10.0, 10.0);
        c.add_point(90.0, 90.0);
        c.end_stroke();
        let drawn = c.snapshot();

        c.clear();
        assert_eq!(*c.buffer(), blank(&c));
        assert!(c.undo());
        assert_eq!(*c.buffer(), drawn);
    }

    #[test]
    fn clearing_blank_canvas_records_nothing() {
        let mut c = small();
        c.clear();
        assert_eq!(c.undo_depth(), 0);
    }

    #[test]
    fn undo_while_stroking_ends_stroke_first() {
        let mut c = small();
        c.start_stroke(10.0, 10.0);
        c.add_point(30.0, 30.0);
        assert!(c.undo());
        assert!(!c.is_stroking());
        assert_eq!(*c.buffer(), blank(&c));
    }

    #[test]
    fn coords_are_clamped_and_corrected() {
        let c = small();
        assert_eq!(c.gesture_to_canvas_coords(320, 240, (640, 480)), Point::new(50.0, 60.0));
        assert_eq!(c.gesture_to_canvas_coords(-40, 470, (640, 480)), Point::new(0.0, 99.0));
        assert_eq!(c.gesture_to_canvas_coords(640, 0, (640, 480)), Point::new(99.0, 0.0));
        // Empty frame size must not divide by zero.
        let p = c.gesture_to_canvas_coords(5, 5, (0, 0));
        assert!(p.x.is_finite() && p.y.is_finite());
    }

    #[test]
    fn brush_thickness_has_floor() {
        let mut c = small();
        c.set_brush_thickness(0);
        assert_eq!(c.brush().1, 1);
    }

    #[test]
    fn display_and_memory_views() {
        let mut c = small();
        assert_eq!(c.display_buffer().dimensions(), (50, 40));
        let fb = c.to_frame_buffer();
        assert_eq!(fb.pixels.len(), 50 * 40);
        assert_eq!(fb.pixels[0], 0x00FF_FFFF);

        c.start_stroke(10.0, 10.0);
        c.add_point(12.0, 10.0);
        c.end_stroke();
        let mem = c.memory_usage();
        assert_eq!(mem.canvas_bytes, 100 * 100 * 3);
        assert!(mem.undo_bytes > 0 && mem.undo_bytes < mem.canvas_bytes / 10);
    }
}
