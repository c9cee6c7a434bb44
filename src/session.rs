// The drawing session: canvas, workers and the gesture-to-action rules.
//
// The presentation layer owns a `Session` and calls `Session::tick` from
// its own timer. Each tick pulls one gesture snapshot and turns it into at
// most one canvas action:
//
// | gesture                | action                                  |
// |------------------------|-----------------------------------------|
// | POINTING               | start the stroke, or extend it          |
// | anything else, drawing | end the stroke                          |
// | PINCH (new)            | undo                                    |
// | OPEN_PALM held         | clear after `clear_hold`                |
// | hand lost, drawing     | end the stroke                          |

use std::time::Instant;

use image::RgbImage;
use tracing::{debug, info};

use crate::camera::{FrameSource, SyntheticSource};
use crate::canvas::{Canvas, MemoryUsage};
use crate::config::{Config, ConfigCell, GestureConfig};
use crate::coordinator::{
    CapturedFrame, Coordinator, CoordinatorStats, GenerationRequest, GenerationResult, GestureState, RequestId,
    ResultStore, ShutdownReport, WorkerError,
};
use crate::error::Result;
use crate::landmarks::{LandmarkProvider, Smoothed};
use crate::style::{self, Generator};
use crate::types::GestureKind;

/// What a tick did to the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanvasAction {
    None,
    StrokeStarted,
    Drew,
    StrokeEnded,
    Undo,
    Cleared,
}

/// Outcome of a generation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Queued { id: RequestId, position: usize },
    QueueFull,
}

/// Where a request stands.
#[derive(Debug, Clone)]
pub enum ResultStatus {
    Complete(GenerationResult),
    Queued { position: usize },
    NotFound,
}

pub struct Session {
    config: Config,
    gesture_config: ConfigCell<GestureConfig>,
    canvas: Canvas,
    coordinator: Coordinator,
    results: ResultStore,
    last_gesture: GestureKind,
    palm_since: Option<Instant>,
    last_sweep: Instant,
}

impl Session {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        info!(
            canvas = ?config.canvas.size,
            queue = config.coordinator.queue_capacity,
            "session created"
        );
        Ok(Self {
            gesture_config: ConfigCell::new(config.gesture.clone()),
            canvas: Canvas::new(&config.canvas),
            coordinator: Coordinator::new(config.coordinator.clone()),
            results: ResultStore::new(config.coordinator.result_ttl),
            last_gesture: GestureKind::None,
            palm_since: None,
            last_sweep: Instant::now(),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /* ---------- workers ---------- */

    /// Start tracking from any frame source. `open` runs on the capture thread.
    pub fn start_capture<S, O, P>(&mut self, open: O, provider: P) -> Result<()>
    where
        S: FrameSource + 'static,
        O: FnOnce() -> Result<S> + Send + 'static,
        P: LandmarkProvider + 'static,
    {
        let mirror = self.config.capture.mirror;
        self.coordinator.start_capture(open, provider, self.gesture_config.clone(), mirror)
    }

    /// Start tracking from the configured camera (or synthetic frames),
    /// smoothing the provider's landmarks.
    pub fn start_camera<P>(&mut self, provider: P) -> Result<()>
    where
        P: LandmarkProvider + 'static,
    {
        let cap = self.config.capture.clone();
        let provider = Smoothed::new(provider, cap.smoothing_alpha);
        if cap.synthetic {
            return self.start_capture(move || Ok(SyntheticSource::new(cap.width, cap.height, cap.fps)), provider);
        }

        #[cfg(feature = "camera")]
        {
            self.start_capture(
                move || crate::camera::CameraCapture::new(cap.camera_index, cap.width, cap.height, cap.fps),
                provider,
            )
        }
        #[cfg(not(feature = "camera"))]
        {
            let _ = provider;
            Err(crate::error::Error::CameraInit("built without the `camera` feature".into()))
        }
    }

    pub fn start_generation<G>(&mut self, generator: G) -> Result<()>
    where
        G: Generator + 'static,
    {
        self.coordinator.start_generation(generator)
    }

    /// Shut the workers down. The canvas stays usable.
    pub fn stop(&mut self) -> ShutdownReport {
        if self.canvas.is_stroking() {
            self.canvas.end_stroke();
        }
        self.coordinator.shutdown(self.config.coordinator.shutdown_timeout)
    }

    /* ---------- consumption loop ---------- */

    /// One pass of the consumption loop at time `now`.
    pub fn tick(&mut self, now: Instant) -> CanvasAction {
        let snapshot = self.coordinator.gesture_snapshot();
        let action = self.apply_gesture(&snapshot, now);

        self.results.drain(self.coordinator.results());
        if now.saturating_duration_since(self.last_sweep) >= self.config.coordinator.sweep_interval {
            self.results.sweep(now);
            self.last_sweep = now;
        }
        action
    }

    fn apply_gesture(&mut self, snap: &GestureState, now: Instant) -> CanvasAction {
        let tip = match (snap.hand_present, snap.index_tip) {
            (true, Some(tip)) => tip,
            _ => {
                self.last_gesture = GestureKind::None;
                self.palm_since = None;
                if self.canvas.is_stroking() {
                    self.canvas.end_stroke();
                    return CanvasAction::StrokeEnded;
                }
                return CanvasAction::None;
            }
        };

        let gesture = snap.gesture;
        let mut action = CanvasAction::None;
        let p = self.canvas.gesture_to_canvas_coords(tip.0, tip.1, snap.frame_size);

        if gesture == GestureKind::Pointing {
            if self.canvas.is_stroking() {
                self.canvas.add_point(p.x, p.y);
                action = CanvasAction::Drew;
            } else {
                self.canvas.start_stroke(p.x, p.y);
                action = CanvasAction::StrokeStarted;
            }
        } else if self.canvas.is_stroking() {
            self.canvas.end_stroke();
            action = CanvasAction::StrokeEnded;
        }

        if gesture == GestureKind::Pinch && self.last_gesture != GestureKind::Pinch && self.canvas.undo() {
            action = CanvasAction::Undo;
        }

        if gesture == GestureKind::OpenPalm {
            match self.palm_since {
                None => self.palm_since = Some(now),
                Some(since) if now.saturating_duration_since(since) > self.config.coordinator.clear_hold => {
                    self.canvas.clear();
                    self.palm_since = None;
                    action = CanvasAction::Cleared;
                }
                Some(_) => {}
            }
        } else {
            self.palm_since = None;
        }

        if gesture != self.last_gesture {
            debug!(from = %self.last_gesture, to = %gesture, ?action, "gesture applied");
        }
        self.last_gesture = gesture;
        action
    }

    /* ---------- commands ---------- */

    pub fn clear(&mut self) {
        self.canvas.clear();
    }

    pub fn undo(&mut self) -> bool {
        self.canvas.undo()
    }

    pub fn redo(&mut self) -> bool {
        self.canvas.redo()
    }

    /// Snapshot the canvas and queue it for `style`. Unknown styles are an error;
    /// a full queue is not.
    pub fn generate(&mut self, style_key: &str) -> Result<Submission> {
        let preset = style::preset(style_key)?;
        let request = GenerationRequest::new(
            self.canvas.snapshot(),
            self.canvas.background(),
            preset,
            self.config.coordinator.inference_steps,
        );
        let id = request.id;
        if !self.coordinator.submit(request) {
            info!(style = style_key, "generation queue full");
            return Ok(Submission::QueueFull);
        }
        let position = self.coordinator.position(id).unwrap_or(0);
        info!(%id, style = style_key, position, "generation submitted");
        Ok(Submission::Queued { id, position })
    }

    pub fn pause_tracking(&self) {
        self.coordinator.pause_tracking();
    }

    pub fn resume_tracking(&self) {
        self.coordinator.resume_tracking();
    }

    /// Publish new classifier thresholds; the capture worker picks them up on its next frame.
    pub fn update_gesture_config(&mut self, config: GestureConfig) -> Result<()> {
        self.gesture_config.store(config.clone())?;
        self.config.gesture = config;
        Ok(())
    }

    /* ---------- accessors ---------- */

    pub fn gesture(&self) -> GestureState {
        self.coordinator.gesture_snapshot()
    }

    pub fn gesture_config(&self) -> ConfigCell<GestureConfig> {
        self.gesture_config.clone()
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    pub fn canvas_mut(&mut self) -> &mut Canvas {
        &mut self.canvas
    }

    pub fn display_buffer(&self) -> RgbImage {
        self.canvas.display_buffer()
    }

    pub fn latest_frame(&self) -> Option<CapturedFrame> {
        self.coordinator.latest_frame()
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Look a request up: finished, still queued (0 = being generated), or unknown.
    pub fn result(&mut self, id: RequestId) -> ResultStatus {
        self.results.drain(self.coordinator.results());
        if let Some(result) = self.results.get(id) {
            return ResultStatus::Complete(result.clone());
        }
        match self.coordinator.position(id) {
            Some(position) => ResultStatus::Queued { position },
            None => ResultStatus::NotFound,
        }
    }

    pub fn errors(&self) -> Vec<WorkerError> {
        self.coordinator.errors()
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.coordinator.stats()
    }

    pub fn memory_usage(&self) -> MemoryUsage {
        self.canvas.memory_usage()
    }

    pub fn stored_results(&self) -> usize {
        self.results.len()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.coordinator.is_shut_down() {
            self.stop();
        }
    }
}
