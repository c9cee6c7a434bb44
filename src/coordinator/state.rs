// Shared containers written by the capture worker and read by everyone else.
//
// Both are a single `parking_lot::Mutex` held only for a field copy. Readers
// always get their own value back, never a guard.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use image::RgbImage;
use parking_lot::Mutex;

use crate::types::{GestureKind, HandLandmarks};

/// Number of recent lock holds kept for [`LockStats`].
const HOLD_SAMPLES: usize = 1000;

/* ---------- Gesture state ---------- */

/// Latest tracking result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GestureState {
    pub gesture: GestureKind,
    pub landmarks: Option<HandLandmarks>,
    /// Index fingertip in source-frame pixels.
    pub index_tip: Option<(i32, i32)>,
    pub hand_present: bool,
    /// Last write; `None` until the first update.
    pub timestamp: Option<Instant>,
    /// Size of the frame the landmarks are expressed in.
    pub frame_size: (u32, u32),
}

/// What the tracker saw of the hand this frame.
#[derive(Debug, Clone, PartialEq)]
pub enum HandObservation {
    Seen { landmarks: HandLandmarks, frame_size: (u32, u32) },
    Lost,
}

/// Fields to change. `None` leaves a field as it is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GestureUpdate {
    pub gesture: Option<GestureKind>,
    pub hand: Option<HandObservation>,
}

impl GestureUpdate {
    pub fn seen(gesture: GestureKind, landmarks: HandLandmarks, frame_size: (u32, u32)) -> Self {
        Self {
            gesture: Some(gesture),
            hand: Some(HandObservation::Seen { landmarks, frame_size }),
        }
    }

    /// No hand in the frame: gesture NONE, landmarks dropped.
    pub fn lost() -> Self {
        Self {
            gesture: Some(GestureKind::None),
            hand: Some(HandObservation::Lost),
        }
    }
}

/// Summary of recent critical-section lengths.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LockStats {
    pub avg: Duration,
    pub max: Duration,
    pub count: usize,
}

pub struct SharedGestureState {
    inner: Mutex<GestureState>,
    // Ring of hold times in nanoseconds; lock-free so measuring adds no contention.
    holds: Box<[AtomicU64]>,
    next_hold: AtomicUsize,
}

impl Default for SharedGestureState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedGestureState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(GestureState::default()),
            holds: (0..HOLD_SAMPLES).map(|_| AtomicU64::new(0)).collect(),
            next_hold: AtomicUsize::new(0),
        }
    }

    /// Apply the provided fields and stamp the time, in one critical section.
    pub fn update(&self, update: GestureUpdate) {
        let held = {
            let mut state = self.inner.lock();
            let acquired = Instant::now();
            if let Some(gesture) = update.gesture {
                state.gesture = gesture;
            }
            match update.hand {
                Some(HandObservation::Seen { landmarks, frame_size }) => {
                    let tip = landmarks.index_tip();
                    state.index_tip = Some((tip.x, tip.y));
                    state.landmarks = Some(landmarks);
                    state.frame_size = frame_size;
                    state.hand_present = true;
                }
                Some(HandObservation::Lost) => {
                    state.landmarks = None;
                    state.index_tip = None;
                    state.hand_present = false;
                }
                None => {}
            }
            state.timestamp = Some(acquired);
            acquired.elapsed()
        };
        self.record_hold(held);
    }

    /// Independent copy of the current state.
    pub fn snapshot(&self) -> GestureState {
        let (copy, held) = {
            let state = self.inner.lock();
            let acquired = Instant::now();
            (state.clone(), acquired.elapsed())
        };
        self.record_hold(held);
        copy
    }

    pub fn lock_stats(&self) -> LockStats {
        let count = self.next_hold.load(Ordering::Acquire).min(HOLD_SAMPLES);
        if count == 0 {
            return LockStats::default();
        }
        let (sum, max) = self.holds[..count]
            .iter()
            .map(|h| h.load(Ordering::Relaxed))
            .fold((0u64, 0u64), |(s, m), v| (s.saturating_add(v), m.max(v)));
        LockStats {
            avg: Duration::from_nanos(sum / count as u64),
            max: Duration::from_nanos(max),
            count,
        }
    }

    fn record_hold(&self, held: Duration) {
        let slot = self.next_hold.fetch_add(1, Ordering::AcqRel) % HOLD_SAMPLES;
        self.holds[slot].store(held.as_nanos() as u64, Ordering::Relaxed);
    }
}

/* ---------- Frame slot ---------- */

/// One captured frame. The image is shared read-only; nobody mutates it after capture.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Increments per captured frame, starting at 1.
    pub id: u64,
    pub captured_at: Instant,
    pub image: Arc<RgbImage>,
}

/// Holds the newest frame only.
#[derive(Default)]
pub struct FrameSlot {
    latest: Mutex<Option<CapturedFrame>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace whatever was there.
    pub fn put(&self, frame: CapturedFrame) {
        *self.latest.lock() = Some(frame);
    }

    /// Newest frame if any. Never waits for a new one.
    pub fn latest(&self) -> Option<CapturedFrame> {
        self.latest.lock().clone()
    }
}
