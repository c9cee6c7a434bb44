// Worker fabric: a capture worker, a generation worker and the shared
// containers between them and the consumer.
//
//   capture worker ──► FrameSlot, SharedGestureState ──► consumer (Session::tick)
//   consumer ──► GenerationQueue ──► generation worker ──► result channel ──► consumer
//   any worker ──► error channel ──► consumer
//
// Workers stop cooperatively. `Coordinator::shutdown` raises a flag and
// joins with a deadline; a worker still busy past it (typically inside a slow
// generator call) is abandoned and reported.

pub mod queue;
pub mod results;
pub mod state;
pub mod workers;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded, unbounded};
use tracing::{info, warn};

use crate::camera::FrameSource;
use crate::config::{ConfigCell, CoordinatorConfig, GestureConfig};
use crate::error::{Error, Result};
use crate::landmarks::LandmarkProvider;
use crate::style::Generator;

pub use self::queue::{GenerationQueue, GenerationRequest, RequestId};
pub use self::results::{GenerationMetadata, GenerationResult, ResultStore};
pub use self::state::{
    CapturedFrame, FrameSlot, GestureState, GestureUpdate, HandObservation, LockStats, SharedGestureState,
};
pub use self::workers::{WorkerError, WorkerKind};

use self::workers::{CaptureContext, GenerationContext};

/// What happened to each worker on shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub joined: Vec<WorkerKind>,
    pub abandoned: Vec<WorkerKind>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.abandoned.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CoordinatorStats {
    pub lock: LockStats,
    pub queue_len: usize,
    pub generating: bool,
    pub tracking: bool,
    pub frames_captured: u64,
    pub pending_errors: usize,
}

struct WorkerHandle {
    kind: WorkerKind,
    handle: JoinHandle<()>,
    // Never sent on; disconnects when the thread is done.
    done: Receiver<()>,
}

impl WorkerHandle {
    fn is_finished(&self) -> bool {
        matches!(self.done.try_recv(), Err(TryRecvError::Disconnected))
    }
}

pub struct Coordinator {
    config: CoordinatorConfig,
    state: Arc<SharedGestureState>,
    frames: Arc<FrameSlot>,
    queue: Arc<GenerationQueue>,
    frames_captured: Arc<AtomicU64>,
    results_tx: Sender<GenerationResult>,
    results_rx: Receiver<GenerationResult>,
    errors_tx: Sender<WorkerError>,
    errors_rx: Receiver<WorkerError>,
    shutdown: Arc<AtomicBool>,
    tracking: Arc<AtomicBool>,
    workers: Vec<WorkerHandle>,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        let (results_tx, results_rx) = unbounded();
        let (errors_tx, errors_rx) = unbounded();
        Self {
            queue: Arc::new(GenerationQueue::new(config.queue_capacity)),
            config,
            state: Arc::new(SharedGestureState::new()),
            frames: Arc::new(FrameSlot::new()),
            frames_captured: Arc::new(AtomicU64::new(0)),
            results_tx,
            results_rx,
            errors_tx,
            errors_rx,
            shutdown: Arc::new(AtomicBool::new(false)),
            tracking: Arc::new(AtomicBool::new(true)),
            workers: Vec::new(),
        }
    }

    /// Start the capture worker.
    ///
    /// `open` runs on the worker thread, so the source itself need not be
    /// `Send`. If it fails the error goes to the error channel and the worker
    /// exits; nothing else is affected.
    pub fn start_capture<S, O, P>(
        &mut self,
        open: O,
        provider: P,
        gesture_config: ConfigCell<GestureConfig>,
        mirror: bool,
    ) -> Result<()>
    where
        S: FrameSource + 'static,
        O: FnOnce() -> Result<S> + Send + 'static,
        P: LandmarkProvider + 'static,
    {
        self.ensure_can_start(WorkerKind::Capture)?;
        let ctx = CaptureContext {
            shutdown: Arc::clone(&self.shutdown),
            tracking: Arc::clone(&self.tracking),
            state: Arc::clone(&self.state),
            frames: Arc::clone(&self.frames),
            frames_captured: Arc::clone(&self.frames_captured),
            errors: self.errors_tx.clone(),
            gesture_config,
            mirror,
            pause_poll: self.config.pause_poll,
        };
        self.spawn(WorkerKind::Capture, move || workers::capture_main(ctx, open, provider))
    }

    /// Start the generation worker.
    pub fn start_generation<G>(&mut self, generator: G) -> Result<()>
    where
        G: Generator + 'static,
    {
        self.ensure_can_start(WorkerKind::Generation)?;
        let ctx = GenerationContext {
            shutdown: Arc::clone(&self.shutdown),
            queue: Arc::clone(&self.queue),
            results: self.results_tx.clone(),
            errors: self.errors_tx.clone(),
            dequeue_timeout: self.config.dequeue_timeout,
        };
        self.spawn(WorkerKind::Generation, move || workers::generation_main(ctx, generator))
    }

    fn ensure_can_start(&mut self, kind: WorkerKind) -> Result<()> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(Error::WorkerSpawn(format!("{kind} worker: coordinator is shut down")));
        }
        // Forget workers that already exited (e.g. a capture source that failed to open).
        self.workers.retain(|w| !w.is_finished());
        if self.workers.iter().any(|w| w.kind == kind) {
            return Err(Error::WorkerSpawn(format!("{kind} worker already running")));
        }
        Ok(())
    }

    fn spawn(&mut self, kind: WorkerKind, body: impl FnOnce() + Send + 'static) -> Result<()> {
        let (done_tx, done_rx) = bounded::<()>(0);
        let handle = thread::Builder::new()
            .name(format!("{kind}-worker"))
            .spawn(move || {
                let _done = done_tx;
                body();
            })
            .map_err(|e| Error::WorkerSpawn(format!("{kind} worker: {e}")))?;
        info!(worker = %kind, "worker started");
        self.workers.push(WorkerHandle { kind, handle, done: done_rx });
        Ok(())
    }

    /// Stop every worker, waiting at most `timeout` in total.
    pub fn shutdown(&mut self, timeout: Duration) -> ShutdownReport {
        self.shutdown.store(true, Ordering::Release);
        let deadline = Instant::now() + timeout;
        let mut report = ShutdownReport::default();

        for worker in self.workers.drain(..) {
            match worker.done.recv_deadline(deadline) {
                Err(RecvTimeoutError::Disconnected) | Ok(()) => {
                    if worker.handle.join().is_err() {
                        warn!(worker = %worker.kind, "worker thread panicked outside its guard");
                    }
                    report.joined.push(worker.kind);
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(worker = %worker.kind, ?timeout, "worker did not stop in time, abandoning");
                    report.abandoned.push(worker.kind);
                }
            }
        }

        info!(joined = report.joined.len(), abandoned = report.abandoned.len(), "coordinator shut down");
        report
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub fn running_workers(&self) -> Vec<WorkerKind> {
        self.workers.iter().filter(|w| !w.is_finished()).map(|w| w.kind).collect()
    }

    pub fn pause_tracking(&self) {
        self.tracking.store(false, Ordering::Release);
        info!("tracking paused");
    }

    pub fn resume_tracking(&self) {
        self.tracking.store(true, Ordering::Release);
        info!("tracking resumed");
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking.load(Ordering::Acquire)
    }

    /// Shared gesture state, for writers outside the capture worker (tests, replays).
    pub fn gesture_state(&self) -> &Arc<SharedGestureState> {
        &self.state
    }

    pub fn gesture_snapshot(&self) -> GestureState {
        self.state.snapshot()
    }

    pub fn latest_frame(&self) -> Option<CapturedFrame> {
        self.frames.latest()
    }

    /// Queue a request without blocking. `false` when the queue is full.
    pub fn submit(&self, request: GenerationRequest) -> bool {
        self.queue.try_enqueue(request)
    }

    pub fn queue(&self) -> &GenerationQueue {
        &self.queue
    }

    pub fn position(&self, id: RequestId) -> Option<usize> {
        self.queue.position(id)
    }

    /// Receiving end of the result channel.
    pub fn results(&self) -> &Receiver<GenerationResult> {
        &self.results_rx
    }

    /// Take every worker error reported so far.
    pub fn errors(&self) -> Vec<WorkerError> {
        self.errors_rx.try_iter().collect()
    }

    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            lock: self.state.lock_stats(),
            queue_len: self.queue.len(),
            generating: self.queue.is_processing(),
            tracking: self.is_tracking(),
            frames_captured: self.frames_captured.load(Ordering::Acquire),
            pending_errors: self.errors_rx.len(),
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            let report = self.shutdown(self.config.shutdown_timeout);
            if !report.is_clean() {
                warn!(abandoned = ?report.abandoned, "workers abandoned on drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;

    use crossbeam_channel::Receiver;
    use image::{Rgb, RgbImage};

    use super::*;
    use crate::camera::SyntheticSource;
    use crate::gesture::poses;
    use crate::landmarks::ManualProvider;
    use crate::style::{Generated, StylePreset, preset};
    use crate::types::GestureKind;

    const WAIT: Duration = Duration::from_secs(3);

    fn config() -> CoordinatorConfig {
        CoordinatorConfig {
            dequeue_timeout: Duration::from_millis(20),
            pause_poll: Duration::from_millis(5),
            shutdown_timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    fn request() -> GenerationRequest {
        let mut canvas = RgbImage::from_pixel(64, 64, Rgb([255, 255, 255]));
        canvas.put_pixel(10, 10, Rgb([0, 0, 0]));
        GenerationRequest::new(canvas, Rgb([255, 255, 255]), preset("sketch").unwrap(), 1)
    }

    fn start_synthetic(c: &mut Coordinator, hand: &ManualProvider) {
        c.start_capture(
            || Ok(SyntheticSource::new(64, 48, 500)),
            hand.clone(),
            ConfigCell::new(GestureConfig::default()),
            false,
        )
        .unwrap();
    }

    struct Echo;

    impl Generator for Echo {
        fn generate(&mut self, input: &RgbImage, _: &StylePreset, _: u32) -> std::result::Result<Generated, String> {
            Ok(Generated { image: input.clone(), backend: "echo".into() })
        }
    }

    /// Blocks each run until the test sends a token.
    struct Gated(Receiver<()>);

    impl Generator for Gated {
        fn generate(&mut self, input: &RgbImage, _: &StylePreset, _: u32) -> std::result::Result<Generated, String> {
            self.0.recv().map_err(|e| e.to_string())?;
            Ok(Generated { image: input.clone(), backend: "gated".into() })
        }
    }

    struct Slow(Duration);

    impl Generator for Slow {
        fn generate(&mut self, input: &RgbImage, _: &StylePreset, _: u32) -> std::result::Result<Generated, String> {
            thread::sleep(self.0);
            Ok(Generated { image: input.clone(), backend: "slow".into() })
        }
    }

    #[test]
    fn capture_worker_confirms_a_held_pose() {
        let mut c = Coordinator::new(config());
        let hand = ManualProvider::new();
        hand.set_hand(poses::pointing());
        start_synthetic(&mut c, &hand);

        assert!(wait_for(|| c.gesture_snapshot().gesture == GestureKind::Pointing));
        let snap = c.gesture_snapshot();
        assert!(snap.hand_present);
        assert_eq!(snap.index_tip, Some((320, 260)));
        assert_eq!(snap.frame_size, (64, 48));
        assert!(c.latest_frame().is_some());

        hand.clear();
        assert!(wait_for(|| !c.gesture_snapshot().hand_present));
        assert_eq!(c.gesture_snapshot().gesture, GestureKind::None);

        assert!(c.shutdown(Duration::from_secs(2)).is_clean());
    }

    #[test]
    fn paused_tracking_captures_nothing() {
        let mut c = Coordinator::new(config());
        start_synthetic(&mut c, &ManualProvider::new());
        assert!(wait_for(|| c.stats().frames_captured > 0));

        c.pause_tracking();
        assert!(!c.stats().tracking);
        // Let any frame already in progress land.
        thread::sleep(Duration::from_millis(50));
        let frozen = c.stats().frames_captured;
        thread::sleep(Duration::from_millis(80));
        assert_eq!(c.stats().frames_captured, frozen);

        c.resume_tracking();
        assert!(wait_for(|| c.stats().frames_captured > frozen));
    }

    #[test]
    fn failed_source_is_reported_and_capture_can_restart() {
        let mut c = Coordinator::new(config());
        c.start_capture(
            || Err::<SyntheticSource, _>(Error::CameraInit("no device".into())),
            ManualProvider::new(),
            ConfigCell::new(GestureConfig::default()),
            true,
        )
        .unwrap();

        let mut errors = Vec::new();
        assert!(wait_for(|| {
            errors.extend(c.errors());
            !errors.is_empty()
        }));
        assert_eq!(errors[0].worker, WorkerKind::Capture);
        assert!(errors[0].message.contains("no device"));

        assert!(wait_for(|| c.running_workers().is_empty()));
        start_synthetic(&mut c, &ManualProvider::new());
        assert_eq!(c.running_workers(), vec![WorkerKind::Capture]);
    }

    /// Fails every read; succeeds for the first `good` ones.
    struct Flaky {
        good: u32,
        reads: Arc<AtomicU64>,
    }

    impl FrameSource for Flaky {
        fn next_frame(&mut self) -> Result<RgbImage> {
            let n = self.reads.fetch_add(1, Ordering::AcqRel);
            if n < self.good as u64 {
                Ok(RgbImage::new(8, 8))
            } else {
                Err(Error::CameraFrame("unplugged".into()))
            }
        }

        fn resolution(&self) -> (u32, u32) {
            (8, 8)
        }
    }

    #[test]
    fn lost_source_stops_the_capture_worker() {
        let mut c = Coordinator::new(config());
        let reads = Arc::new(AtomicU64::new(0));
        let source = Flaky { good: 3, reads: Arc::clone(&reads) };
        c.start_capture(
            move || Ok(source),
            ManualProvider::new(),
            ConfigCell::new(GestureConfig::default()),
            false,
        )
        .unwrap();

        let mut errors = Vec::new();
        assert!(wait_for(|| {
            errors.extend(c.errors());
            !errors.is_empty()
        }));
        assert_eq!(errors[0].worker, WorkerKind::Capture);
        assert!(errors[0].message.contains("unplugged"));
        assert!(wait_for(|| c.running_workers().is_empty()));
        assert_eq!(reads.load(Ordering::Acquire), 3 + workers::MAX_FRAME_FAILURES as u64);
        assert_eq!(c.stats().frames_captured, 3);
    }

    #[test]
    fn second_worker_of_a_kind_is_refused() {
        let mut c = Coordinator::new(config());
        c.start_generation(Echo).unwrap();
        assert!(matches!(c.start_generation(Echo), Err(Error::WorkerSpawn(_))));

        c.shutdown(Duration::from_secs(2));
        assert!(c.is_shut_down());
        assert!(matches!(c.start_generation(Echo), Err(Error::WorkerSpawn(_))));
    }

    #[test]
    fn generation_round_trip() {
        let mut c = Coordinator::new(config());
        c.start_generation(Echo).unwrap();
        let req = request();
        let id = req.id;
        assert!(c.submit(req));

        let result = c.results().recv_timeout(WAIT).unwrap();
        assert_eq!(result.id, id);
        assert!(result.is_success());
        assert_eq!(result.metadata.backend.as_deref(), Some("echo"));
        assert!(wait_for(|| !c.stats().generating));
        assert_eq!(c.position(id), None);
    }

    #[test]
    fn in_flight_request_reports_position_zero() {
        let mut c = Coordinator::new(config());
        let (release, gate) = bounded(0);
        c.start_generation(Gated(gate)).unwrap();

        let (a, b) = (request(), request());
        let (id_a, id_b) = (a.id, b.id);
        assert!(c.submit(a));
        assert!(c.submit(b));

        assert!(wait_for(|| c.position(id_a) == Some(0)));
        assert_eq!(c.position(id_b), Some(1));
        assert!(c.stats().generating);
        assert_eq!(c.queue().positions(), vec![(id_a, 0), (id_b, 1)]);

        release.send(()).unwrap();
        assert_eq!(c.results().recv_timeout(WAIT).unwrap().id, id_a);
        assert!(wait_for(|| c.position(id_b) == Some(0)));
        release.send(()).unwrap();
        assert_eq!(c.results().recv_timeout(WAIT).unwrap().id, id_b);
    }

    #[test]
    fn full_queue_refuses_without_blocking() {
        let c = Coordinator::new(CoordinatorConfig { queue_capacity: 2, ..config() });
        assert!(c.submit(request()));
        assert!(c.submit(request()));
        assert!(!c.submit(request()));
        assert_eq!(c.stats().queue_len, 2);
    }

    #[test]
    fn shutdown_abandons_a_stuck_generator() {
        let mut c = Coordinator::new(config());
        c.start_generation(Slow(Duration::from_millis(1500))).unwrap();
        let req = request();
        let id = req.id;
        assert!(c.submit(req));
        assert!(wait_for(|| c.position(id) == Some(0)));

        let started = Instant::now();
        let report = c.shutdown(Duration::from_millis(100));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(report.abandoned, vec![WorkerKind::Generation]);
        assert!(!report.is_clean());
    }

    #[test]
    fn idle_workers_join_cleanly() {
        let mut c = Coordinator::new(config());
        start_synthetic(&mut c, &ManualProvider::new());
        c.start_generation(Echo).unwrap();

        let report = c.shutdown(Duration::from_secs(2));
        assert!(report.is_clean());
        assert_eq!(report.joined.len(), 2);
        assert!(c.running_workers().is_empty());
    }

    #[test]
    fn concurrent_writers_never_tear_the_state() {
        let state = Arc::new(SharedGestureState::new());
        let barrier = Arc::new(Barrier::new(8));
        let mut handles = Vec::new();

        for w in 0..4 {
            let (state, barrier) = (Arc::clone(&state), Arc::clone(&barrier));
            handles.push(thread::spawn(move || {
                barrier.wait();
                for i in 0..500 {
                    if (i + w) % 3 == 0 {
                        state.update(GestureUpdate::lost());
                    } else {
                        state.update(GestureUpdate::seen(
                            GestureKind::Pointing,
                            poses::pointing_at(w * 100 + i % 50, i),
                            (640, 480),
                        ));
                    }
                }
            }));
        }
        for _ in 0..4 {
            let (state, barrier) = (Arc::clone(&state), Arc::clone(&barrier));
            handles.push(thread::spawn(move || {
                barrier.wait();
                for _ in 0..500 {
                    let snap = state.snapshot();
                    match &snap.landmarks {
                        Some(lm) => {
                            assert!(snap.hand_present);
                            assert_eq!(snap.gesture, GestureKind::Pointing);
                            let tip = lm.index_tip();
                            assert_eq!(snap.index_tip, Some((tip.x, tip.y)));
                        }
                        None => {
                            assert!(!snap.hand_present);
                            assert!(snap.index_tip.is_none());
                        }
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let stats = state.lock_stats();
        assert_eq!(stats.count, 1000);
        assert!(stats.avg <= stats.max);
        assert!(stats.avg < Duration::from_millis(1), "avg hold {:?} under contention", stats.avg);
    }
}
