// The hand-landmark seam.
//
// A provider turns one RGB frame into zero or more hands, each a fixed set of
// 21 pixel-space landmarks. Detection models live outside this crate; they
// plug in by implementing `LandmarkProvider`.

use std::collections::HashMap;
use std::sync::Arc;

use image::RgbImage;
use parking_lot::Mutex;

use crate::types::{HandLandmarks, LANDMARK_COUNT, Landmark};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Handedness {
    Left,
    Right,
    #[default]
    Unknown,
}

/// One hand found in a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedHand {
    pub landmarks: HandLandmarks,
    pub handedness: Handedness,
    /// Detector confidence in [0, 1].
    pub score: f32,
}

impl DetectedHand {
    pub fn new(landmarks: HandLandmarks) -> Self {
        Self { landmarks, handedness: Handedness::Unknown, score: 1.0 }
    }
}

/// Per-frame landmark detector. Called once per captured frame from the capture worker.
pub trait LandmarkProvider: Send {
    fn detect(&mut self, frame: &RgbImage) -> Vec<DetectedHand>;
}

impl<P: LandmarkProvider + ?Sized> LandmarkProvider for Box<P> {
    fn detect(&mut self, frame: &RgbImage) -> Vec<DetectedHand> {
        (**self).detect(frame)
    }
}

/* ---------- Smoothing ---------- */

/// Exponential moving average over each landmark of each hand slot.
///
/// Hands are matched by their position in the detector's output. Any frame
/// without hands wipes the history so the next hand starts unsmoothed.
pub struct Smoothed<P> {
    inner: P,
    alpha: f32,
    history: HashMap<usize, [(i32, i32); LANDMARK_COUNT]>,
}

impl<P: LandmarkProvider> Smoothed<P> {
    pub fn new(inner: P, alpha: f32) -> Self {
        Self { inner, alpha: alpha.clamp(f32::EPSILON, 1.0), history: HashMap::new() }
    }

    fn smooth(&mut self, slot: usize, hand: &mut HandLandmarks) {
        let alpha = self.alpha;
        let prev = self.history.get(&slot).copied();
        let mut next = [(0, 0); LANDMARK_COUNT];
        for (i, lm) in hand.points_mut().iter_mut().enumerate() {
            let (x, y) = match prev {
                Some(p) => {
                    let (px, py) = p[i];
                    (
                        (px as f32 * (1.0 - alpha) + lm.x as f32 * alpha) as i32,
                        (py as f32 * (1.0 - alpha) + lm.y as f32 * alpha) as i32,
                    )
                }
                None => (lm.x, lm.y),
            };
            *lm = Landmark::new(x, y, lm.z);
            next[i] = (x, y);
        }
        self.history.insert(slot, next);
    }
}

impl<P: LandmarkProvider> LandmarkProvider for Smoothed<P> {
    fn detect(&mut self, frame: &RgbImage) -> Vec<DetectedHand> {
        let mut hands = self.inner.detect(frame);
        if hands.is_empty() {
            self.history.clear();
            return hands;
        }
        for (slot, hand) in hands.iter_mut().enumerate() {
            self.smooth(slot, &mut hand.landmarks);
        }
        hands
    }
}

/* ---------- ManualProvider ---------- */

/// Reports whatever hands were last handed to it, ignoring the frame.
///
/// Clones share the same slot, so one clone can live in the capture worker
/// while another is fed from a pointer, a script or a test.
#[derive(Clone, Default)]
pub struct ManualProvider {
    hands: Arc<Mutex<Vec<DetectedHand>>>,
}

impl ManualProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, hands: Vec<DetectedHand>) {
        *self.hands.lock() = hands;
    }

    pub fn set_hand(&self, hand: HandLandmarks) {
        self.set(vec![DetectedHand::new(hand)]);
    }

    pub fn clear(&self) {
        self.hands.lock().clear();
    }
}

impl LandmarkProvider for ManualProvider {
    fn detect(&mut self, _frame: &RgbImage) -> Vec<DetectedHand> {
        self.hands.lock().clone()
    }
}
