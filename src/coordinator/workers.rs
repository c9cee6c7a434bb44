// Worker loop bodies.
// Both loops watch the shared shutdown flag once per iteration and never
// let a fault cross the thread boundary: failures become `WorkerError`s or
// failed `GenerationResult`s.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use image::imageops;
use tracing::{debug, error, info, warn};

use super::queue::{GenerationQueue, GenerationRequest};
use super::results::{GenerationMetadata, GenerationResult};
use super::state::{CapturedFrame, FrameSlot, GestureUpdate, SharedGestureState};
use crate::camera::FrameSource;
use crate::config::{ConfigCell, GestureConfig};
use crate::error::Result;
use crate::gesture::GestureClassifier;
use crate::landmarks::LandmarkProvider;
use crate::style::{CROP_MARGIN, Generator, TARGET_SIZE, prepare_input};

/// Back-off after a failed frame read.
const FRAME_RETRY: Duration = Duration::from_millis(10);

/// Consecutive failed reads (about a second of retries) after which the source counts as lost.
pub(crate) const MAX_FRAME_FAILURES: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerKind {
    Capture,
    Generation,
}

impl WorkerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Capture => "capture",
            Self::Generation => "generation",
        }
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure a worker could not recover from locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerError {
    pub worker: WorkerKind,
    pub message: String,
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} worker: {}", self.worker, self.message)
    }
}

/// Flags and containers the capture loop touches.
pub(crate) struct CaptureContext {
    pub shutdown: Arc<AtomicBool>,
    pub tracking: Arc<AtomicBool>,
    pub state: Arc<SharedGestureState>,
    pub frames: Arc<FrameSlot>,
    pub frames_captured: Arc<AtomicU64>,
    pub errors: Sender<WorkerError>,
    pub gesture_config: ConfigCell<GestureConfig>,
    pub mirror: bool,
    pub pause_poll: Duration,
}

pub(crate) struct GenerationContext {
    pub shutdown: Arc<AtomicBool>,
    pub queue: Arc<GenerationQueue>,
    pub results: Sender<GenerationResult>,
    pub errors: Sender<WorkerError>,
    pub dequeue_timeout: Duration,
}

/// Capture thread body: open the source here, then track until shutdown.
pub(crate) fn capture_main<S, O, P>(ctx: CaptureContext, open: O, provider: P)
where
    S: FrameSource,
    O: FnOnce() -> Result<S>,
    P: LandmarkProvider,
{
    let errors = ctx.errors.clone();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| run_capture(&ctx, open, provider)));
    if let Err(payload) = outcome {
        let message = format!("panicked: {}", panic_message(payload.as_ref()));
        error!(worker = "capture", %message, "worker stopped");
        let _ = errors.send(WorkerError { worker: WorkerKind::Capture, message });
    }
}

fn run_capture<S, O, P>(ctx: &CaptureContext, open: O, mut provider: P)
where
    S: FrameSource,
    O: FnOnce() -> Result<S>,
    P: LandmarkProvider,
{
    let mut source = match open() {
        Ok(source) => source,
        Err(e) => {
            error!(worker = "capture", error = %e, "frame source failed to open");
            let _ = ctx.errors.send(WorkerError { worker: WorkerKind::Capture, message: e.to_string() });
            return;
        }
    };
    let (w, h) = source.resolution();
    info!(width = w, height = h, mirror = ctx.mirror, "capture worker running");

    let mut classifier = GestureClassifier::new(ctx.gesture_config.clone());
    let mut frame_id = 0u64;
    let mut failures = 0u32;

    while !ctx.shutdown.load(Ordering::Acquire) {
        if !ctx.tracking.load(Ordering::Acquire) {
            thread::sleep(ctx.pause_poll);
            continue;
        }

        let mut image = match source.next_frame() {
            Ok(image) => {
                if failures > 0 {
                    info!(skipped = failures, "frame source recovered");
                    failures = 0;
                }
                image
            }
            Err(e) => {
                failures += 1;
                if failures == 1 {
                    warn!(error = %e, "frame skipped, retrying");
                } else {
                    debug!(error = %e, failures, "frame skipped");
                }
                if failures >= MAX_FRAME_FAILURES {
                    error!(worker = "capture", failures, error = %e, "frame source lost");
                    let message = format!("frame source lost after {failures} failed reads: {e}");
                    let _ = ctx.errors.send(WorkerError { worker: WorkerKind::Capture, message });
                    break;
                }
                thread::sleep(FRAME_RETRY);
                continue;
            }
        };
        if ctx.mirror {
            imageops::flip_horizontal_in_place(&mut image);
        }

        let frame_size = image.dimensions();
        let image = Arc::new(image);
        frame_id += 1;
        ctx.frames.put(CapturedFrame { id: frame_id, captured_at: Instant::now(), image: Arc::clone(&image) });
        ctx.frames_captured.store(frame_id, Ordering::Release);

        let hands = provider.detect(&image);
        let update = match hands.first() {
            Some(hand) => {
                let gesture = classifier.classify(&hand.landmarks);
                GestureUpdate::seen(gesture, hand.landmarks, frame_size)
            }
            // The classifier window stays as it is until a hand comes back.
            None => GestureUpdate::lost(),
        };
        ctx.state.update(update);
    }

    info!(frames = frame_id, "capture worker stopped");
}

/// Generation thread body: serve requests one at a time until shutdown.
pub(crate) fn generation_main<G: Generator>(ctx: GenerationContext, generator: G) {
    let errors = ctx.errors.clone();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| run_generation(&ctx, generator)));
    if let Err(payload) = outcome {
        let message = format!("panicked: {}", panic_message(payload.as_ref()));
        error!(worker = "generation", %message, "worker stopped");
        let _ = errors.send(WorkerError { worker: WorkerKind::Generation, message });
    }
}

fn run_generation<G: Generator>(ctx: &GenerationContext, mut generator: G) {
    info!("generation worker running");
    let mut served = 0u64;

    while !ctx.shutdown.load(Ordering::Acquire) {
        let Some(request) = ctx.queue.dequeue(ctx.dequeue_timeout) else {
            continue;
        };
        let result = serve(&mut generator, request);
        served += 1;
        if ctx.results.send(result).is_err() {
            warn!("result channel closed");
        }
        ctx.queue.mark_complete();
    }

    info!(served, "generation worker stopped");
}

/// Run one request. Errors and panics both come back as a failed result.
pub(crate) fn serve<G: Generator>(generator: &mut G, request: GenerationRequest) -> GenerationResult {
    let started = Instant::now();
    let queued_for = started.saturating_duration_since(request.submitted_at);
    debug!(id = %request.id, style = request.style.key, "generation started");

    let run = panic::catch_unwind(AssertUnwindSafe(|| {
        let prepared = prepare_input(&request.canvas, request.background, CROP_MARGIN, TARGET_SIZE);
        let generated = generator.generate(&prepared.image, request.style, request.steps);
        (prepared.info, generated)
    }));

    let (crop, backend, outcome) = match run {
        Ok((info, Ok(generated))) => (Some(info), Some(generated.backend), Ok(generated.image)),
        Ok((info, Err(e))) => (Some(info), None, Err(e)),
        Err(payload) => (None, None, Err(format!("generator panicked: {}", panic_message(payload.as_ref())))),
    };

    // Cache clearing must not take the worker down either.
    if panic::catch_unwind(AssertUnwindSafe(|| generator.clear_cache())).is_err() {
        warn!(id = %request.id, "clear_cache panicked");
    }

    let generation_time = started.elapsed();
    match &outcome {
        Ok(_) => info!(id = %request.id, style = request.style.key, ms = generation_time.as_millis() as u64, "generation finished"),
        Err(e) => warn!(id = %request.id, style = request.style.key, error = %e, "generation failed"),
    }

    GenerationResult {
        id: request.id,
        outcome,
        metadata: GenerationMetadata {
            style: request.style.key,
            preset_name: request.style.name,
            steps: request.steps,
            queued_for,
            generation_time,
            crop,
            backend,
        },
        completed_at: Instant::now(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::style::{Generated, StylePreset, preset};
    use image::{Rgb, RgbImage};

    struct Exploding;

    impl Generator for Exploding {
        fn generate(&mut self, _: &RgbImage, _: &StylePreset, _: u32) -> std::result::Result<Generated, String> {
            panic!("out of memory");
        }
    }

    struct Echo {
        cleared: u32,
    }

    impl Generator for Echo {
        fn generate(&mut self, input: &RgbImage, _: &StylePreset, steps: u32) -> std::result::Result<Generated, String> {
            Ok(Generated { image: input.clone(), backend: format!("echo/{steps}") })
        }

        fn clear_cache(&mut self) {
            self.cleared += 1;
        }
    }

    fn request() -> GenerationRequest {
        let mut canvas = RgbImage::from_pixel(100, 100, Rgb([255, 255, 255]));
        canvas.put_pixel(50, 50, Rgb([0, 0, 0]));
        GenerationRequest::new(canvas, Rgb([255, 255, 255]), preset("anime").unwrap(), 2)
    }

    #[test]
    fn panic_becomes_failed_result() {
        let result = serve(&mut Exploding, request());
        assert!(!result.is_success());
        assert!(result.error().unwrap().contains("out of memory"));
        assert_eq!(result.metadata.style, "anime");
    }

    #[test]
    fn success_carries_metadata_and_clears_cache() {
        let mut echo = Echo { cleared: 0 };
        let result = serve(&mut echo, request());
        assert!(result.is_success());
        assert_eq!(echo.cleared, 1);
        assert_eq!(result.metadata.steps, 2);
        assert_eq!(result.metadata.backend.as_deref(), Some("echo/2"));
        assert!(result.metadata.crop.as_ref().unwrap().bbox.is_some());
        let (w, h) = result.image().unwrap().dimensions();
        assert_eq!((w % 8, h % 8), (0, 0));
    }

    #[test]
    fn worker_error_display_names_the_worker() {
        let e = WorkerError { worker: WorkerKind::Capture, message: "no camera".into() };
        assert_eq!(e.to_string(), "capture worker: no camera");
    }
}
