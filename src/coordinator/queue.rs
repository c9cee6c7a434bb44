// Bounded FIFO of generation requests with queue positions.
//
// Requests travel through a bounded crossbeam channel. Next to it a small
// ledger remembers which id is being served and the FIFO order of the rest,
// so callers can ask for a position: 0 = in flight, 1..N = waiting.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use image::{Rgb, RgbImage};
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::style::StylePreset;

/// Identifier handed back on submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One canvas snapshot waiting to be styled.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub id: RequestId,
    pub canvas: RgbImage,
    /// Canvas background, used to find the drawn content when cropping.
    pub background: Rgb<u8>,
    pub style: &'static StylePreset,
    pub steps: u32,
    pub submitted_at: Instant,
}

impl GenerationRequest {
    pub fn new(canvas: RgbImage, background: Rgb<u8>, style: &'static StylePreset, steps: u32) -> Self {
        Self {
            id: RequestId::new(),
            canvas,
            background,
            style,
            steps,
            submitted_at: Instant::now(),
        }
    }
}

#[derive(Default)]
struct Ledger {
    in_flight: Option<RequestId>,
    waiting: VecDeque<RequestId>,
}

pub struct GenerationQueue {
    tx: Sender<GenerationRequest>,
    rx: Receiver<GenerationRequest>,
    ledger: Mutex<Ledger>,
    capacity: usize,
}

impl GenerationQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        Self { tx, rx, ledger: Mutex::new(Ledger::default()), capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Add a request without blocking. `false` means the queue is full.
    pub fn try_enqueue(&self, request: GenerationRequest) -> bool {
        let id = request.id;
        // The ledger lock covers the send so a fast consumer cannot see the
        // request before its id is in `waiting`.
        let mut ledger = self.ledger.lock();
        match self.tx.try_send(request) {
            Ok(()) => {
                ledger.waiting.push_back(id);
                debug!(%id, position = ledger.waiting.len(), "generation queued");
                true
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Next request, waiting at most `timeout`. The request becomes in-flight.
    pub fn dequeue(&self, timeout: Duration) -> Option<GenerationRequest> {
        let request = match self.rx.recv_timeout(timeout) {
            Ok(r) => r,
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return None,
        };
        let mut ledger = self.ledger.lock();
        ledger.waiting.retain(|id| *id != request.id);
        ledger.in_flight = Some(request.id);
        Some(request)
    }

    /// The in-flight request is done.
    pub fn mark_complete(&self) {
        self.ledger.lock().in_flight = None;
    }

    /// 0 for the request being served, 1..N for waiting ones, `None` if unknown.
    pub fn position(&self, id: RequestId) -> Option<usize> {
        let ledger = self.ledger.lock();
        if ledger.in_flight == Some(id) {
            return Some(0);
        }
        ledger.waiting.iter().position(|w| *w == id).map(|i| i + 1)
    }

    /// Every known request with its position, in serving order.
    pub fn positions(&self) -> Vec<(RequestId, usize)> {
        let ledger = self.ledger.lock();
        ledger
            .in_flight
            .iter()
            .copied()
            .map(|id| (id, 0))
            .chain(ledger.waiting.iter().enumerate().map(|(i, id)| (*id, i + 1)))
            .collect()
    }

    /// Waiting requests, not counting the one in flight.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn is_processing(&self) -> bool {
        self.ledger.lock().in_flight.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::style::preset;

    fn request() -> GenerationRequest {
        GenerationRequest::new(RgbImage::new(8, 8), Rgb([255, 255, 255]), preset("sketch").unwrap(), 4)
    }

    #[test]
    fn full_queue_rejects_without_blocking() {
        let queue = GenerationQueue::new(5);
        for _ in 0..5 {
            assert!(queue.try_enqueue(request()));
        }
        let started = Instant::now();
        assert!(!queue.try_enqueue(request()));
        assert!(started.elapsed() < Duration::from_millis(50));
        assert_eq!(queue.len(), 5);
    }

    #[test]
    fn positions_follow_fifo_and_in_flight_is_zero() {
        let queue = GenerationQueue::new(5);
        let ids: Vec<RequestId> = (0..3)
            .map(|_| {
                let r = request();
                let id = r.id;
                assert!(queue.try_enqueue(r));
                id
            })
            .collect();
        assert_eq!(queue.position(ids[0]), Some(1));
        assert_eq!(queue.position(ids[2]), Some(3));

        let served = queue.dequeue(Duration::from_millis(10)).unwrap();
        assert_eq!(served.id, ids[0]);
        assert!(queue.is_processing());
        assert_eq!(queue.position(ids[0]), Some(0));
        assert_eq!(queue.position(ids[1]), Some(1));
        assert_eq!(queue.positions(), vec![(ids[0], 0), (ids[1], 1), (ids[2], 2)]);

        queue.mark_complete();
        assert_eq!(queue.position(ids[0]), None);
        assert!(!queue.is_processing());
    }

    #[test]
    fn in_flight_frees_a_slot() {
        let queue = GenerationQueue::new(1);
        assert!(queue.try_enqueue(request()));
        assert!(!queue.try_enqueue(request()));
        queue.dequeue(Duration::from_millis(10)).unwrap();
        assert!(queue.try_enqueue(request()));
    }

    #[test]
    fn dequeue_times_out_on_empty_queue() {
        let queue = GenerationQueue::new(2);
        let started = Instant::now();
        assert!(queue.dequeue(Duration::from_millis(30)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(25));
        assert!(!queue.is_processing());
    }

    #[test]
    fn request_ids_are_unique() {
        assert_ne!(RequestId::new(), RequestId::new());
        assert_eq!(RequestId::new().to_string().len(), 36);
    }
}
