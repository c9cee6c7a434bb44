// Debounced hand-pose classifier.
//
// Each call looks at one hand's landmarks, derives a raw pose from a few
// distance rules, and only lets the reported gesture change after the same
// raw pose has been seen `hysteresis_frames` times in a row. A confirmed
// change then freezes the output for `cooldown_frames` calls.
//
// When no hand is visible the caller reports `GestureKind::None` itself;
// the window here is left as it was until fresh landmarks arrive.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::debug;

use crate::config::{ConfigCell, GestureConfig};
use crate::types::{GestureKind, HandLandmarks, Landmark};

pub struct GestureClassifier {
    config: ConfigCell<GestureConfig>,
    seen_version: u64,
    window: VecDeque<GestureKind>,
    confirmed: GestureKind,
    cooldown: u32,
}

impl GestureClassifier {
    pub fn new(config: ConfigCell<GestureConfig>) -> Self {
        let (seen_version, snapshot) = config.load_versioned();
        Self {
            config,
            seen_version,
            window: VecDeque::with_capacity(snapshot.hysteresis_frames),
            confirmed: GestureKind::None,
            cooldown: 0,
        }
    }

    /// Classifier with fixed thresholds.
    pub fn with_config(config: GestureConfig) -> Self {
        Self::new(ConfigCell::new(config))
    }

    pub fn confirmed(&self) -> GestureKind {
        self.confirmed
    }

    pub fn cooldown_remaining(&self) -> u32 {
        self.cooldown
    }

    /// Forget the window, the cooldown and the confirmed gesture.
    pub fn reset(&mut self) {
        self.window.clear();
        self.confirmed = GestureKind::None;
        self.cooldown = 0;
    }

    pub fn classify(&mut self, hand: &HandLandmarks) -> GestureKind {
        if self.cooldown > 0 {
            self.cooldown -= 1;
            return self.confirmed;
        }

        let cfg = self.refresh_config();
        let raw = raw_gesture(hand, &cfg);

        self.window.push_back(raw);
        while self.window.len() > cfg.hysteresis_frames {
            self.window.pop_front();
        }

        let full = self.window.len() == cfg.hysteresis_frames;
        if full && raw != self.confirmed && self.window.iter().all(|g| *g == raw) {
            debug!(from = %self.confirmed, to = %raw, "gesture confirmed");
            self.confirmed = raw;
            self.cooldown = cfg.cooldown_frames;
        }

        self.confirmed
    }

    /// Pick up threshold changes published since the last call.
    fn refresh_config(&mut self) -> Arc<GestureConfig> {
        let (version, cfg) = self.config.load_versioned();
        if version != self.seen_version {
            self.seen_version = version;
            // Keep the newest readings when the window shrinks.
            while self.window.len() > cfg.hysteresis_frames {
                self.window.pop_front();
            }
        }
        cfg
    }
}

/// Undebounced pose for a single frame.
pub fn raw_gesture(hand: &HandLandmarks, cfg: &GestureConfig) -> GestureKind {
    let wrist = hand.wrist();

    let mut hand_scale = wrist.distance(&hand.middle_mcp());
    if hand_scale == 0.0 {
        hand_scale = 1.0;
    }

    let extended = |tip: Landmark, mcp: Landmark| {
        wrist.distance(&tip) > wrist.distance(&mcp) * cfg.extended_ratio
    };
    let index = extended(hand.index_tip(), hand.index_mcp());
    let middle = extended(hand.middle_tip(), hand.middle_mcp());
    let ring = extended(hand.ring_tip(), hand.ring_mcp());
    let pinky = extended(hand.pinky_tip(), hand.pinky_mcp());

    let pinch = hand.thumb_tip().distance(&hand.index_tip()) < hand_scale * cfg.pinch_ratio;

    if pinch {
        GestureKind::Pinch
    } else if !index && !middle && !ring && !pinky {
        GestureKind::Fist
    } else if index && !middle && !ring && !pinky {
        GestureKind::Pointing
    } else if index && middle && ring && pinky {
        GestureKind::OpenPalm
    } else {
        GestureKind::Unknown
    }
}

/// Synthetic hand poses shared by the tests and the pointer-driven demo.
#[doc(hidden)]
pub mod poses {
    use crate::types::{HandLandmarks, LANDMARK_COUNT, Landmark};

    fn hand(points: impl IntoIterator<Item = (i32, i32)>) -> HandLandmarks {
        let mut out = [Landmark::default(); LANDMARK_COUNT];
        for (slot, (x, y)) in out.iter_mut().zip(points) {
            *slot = Landmark::new(x, y, 0.0);
        }
        HandLandmarks::new(out)
    }

    /// Every fingertip curled back toward the palm.
    pub fn fist() -> HandLandmarks {
        let (bx, by) = (320, 400);
        hand([
            (bx, by),
            (bx - 15, by - 10), (bx - 20, by - 15), (bx - 22, by - 18), (bx - 20, by - 20),
            (bx - 5, by - 40), (bx - 5, by - 30), (bx - 5, by - 22), (bx - 5, by - 15),
            (bx, by - 42), (bx, by - 32), (bx, by - 24), (bx, by - 16),
            (bx + 5, by - 40), (bx + 5, by - 30), (bx + 5, by - 22), (bx + 5, by - 15),
            (bx + 10, by - 35), (bx + 10, by - 26), (bx + 10, by - 19), (bx + 10, by - 13),
        ])
    }

    /// All four fingers stretched out, thumb well away from the index tip.
    pub fn open_palm() -> HandLandmarks {
        let (bx, by) = (320, 400);
        let mut pts = vec![(bx, by)];
        pts.extend((1..5).map(|i| (bx - 30 - i * 10, by - i * 15)));
        pts.extend((5..9).map(|i| (bx - 15, by - (i - 4) * 30)));
        pts.extend((9..13).map(|i| (bx, by - (i - 8) * 32)));
        pts.extend((13..17).map(|i| (bx + 15, by - (i - 12) * 30)));
        pts.extend((17..21).map(|i| (bx + 30, by - (i - 16) * 25)));
        hand(pts)
    }

    /// Only the index finger extended; tip at (`tip_x`, `tip_y`).
    pub fn pointing_at(tip_x: i32, tip_y: i32) -> HandLandmarks {
        let (bx, by) = (tip_x, tip_y + 140);
        let mut pts = vec![(bx, by)];
        pts.extend((1..5).map(|_| (bx - 40, by - 10)));
        pts.extend((5..9).map(|i| (bx, by - (i - 4) * 35)));
        // Middle MCP sets the hand scale; the curled fingers sit just above the wrist.
        pts.push((bx + 10, by - 40));
        pts.extend((10..13).map(|_| (bx + 10, by - 20)));
        pts.push((bx + 15, by - 38));
        pts.extend((14..17).map(|_| (bx + 15, by - 20)));
        pts.push((bx + 20, by - 34));
        pts.extend((18..21).map(|_| (bx + 20, by - 18)));
        hand(pts)
    }

    pub fn pointing() -> HandLandmarks {
        pointing_at(320, 260)
    }

    /// Thumb tip touching the index tip.
    pub fn pinch() -> HandLandmarks {
        let mut h = open_palm();
        let tip = h.index_tip();
        h.points_mut()[crate::types::THUMB_TIP] = Landmark::new(tip.x + 2, tip.y + 2, 0.0);
        h
    }

    /// Every point on top of every other.
    pub fn collapsed() -> HandLandmarks {
        hand(std::iter::repeat((320, 240)).take(LANDMARK_COUNT))
    }
}

#[cfg(test)]
mod tests {
    use super::poses::*;
    use super::*;

    fn classifier() -> GestureClassifier {
        GestureClassifier::with_config(GestureConfig::default())
    }

    #[test]
    fn raw_rules_recognise_reference_poses() {
        let cfg = GestureConfig::default();
        assert_eq!(raw_gesture(&fist(), &cfg), GestureKind::Fist);
        assert_eq!(raw_gesture(&open_palm(), &cfg), GestureKind::OpenPalm);
        assert_eq!(raw_gesture(&pointing(), &cfg), GestureKind::Pointing);
        assert_eq!(raw_gesture(&pinch(), &cfg), GestureKind::Pinch);
    }

    #[test]
    fn unmatched_pose_is_unknown_not_none() {
        // Index and middle out, ring and pinky curled: no rule fits.
        let mut two_fingers = pointing_at(320, 260);
        two_fingers.points_mut()[crate::types::MIDDLE_TIP] = Landmark::new(330, 260, 0.0);
        let cfg = GestureConfig::default();
        assert_eq!(raw_gesture(&two_fingers, &cfg), GestureKind::Unknown);

        let mut c = classifier();
        for _ in 0..3 {
            c.classify(&two_fingers);
        }
        assert_eq!(c.confirmed(), GestureKind::Unknown);
    }

    #[test]
    fn degenerate_hand_does_not_panic() {
        // Zero hand scale clamps to 1; all distances are zero so thumb-index < 0.3 wins.
        let cfg = GestureConfig::default();
        assert_eq!(raw_gesture(&collapsed(), &cfg), GestureKind::Pinch);
    }

    #[test]
    fn change_needs_full_window() {
        let mut c = classifier();
        assert_eq!(c.classify(&fist()), GestureKind::None);
        assert_eq!(c.classify(&fist()), GestureKind::None);
        assert_eq!(c.classify(&fist()), GestureKind::Fist);
    }

    #[test]
    fn interrupted_run_does_not_confirm() {
        let mut c = classifier();
        c.classify(&fist());
        c.classify(&fist());
        c.classify(&open_palm());
        assert_eq!(c.classify(&fist()), GestureKind::None);
    }

    #[test]
    fn fist_then_palm_scenario() {
        let mut c = classifier();
        for _ in 0..3 {
            c.classify(&fist());
        }
        assert_eq!(c.confirmed(), GestureKind::Fist);
        assert_eq!(c.cooldown_remaining(), 5);

        // One stray palm frame during cooldown changes nothing.
        assert_eq!(c.classify(&open_palm()), GestureKind::Fist);

        // Burn the rest of the cooldown.
        for _ in 0..4 {
            assert_eq!(c.classify(&open_palm()), GestureKind::Fist);
        }
        assert_eq!(c.cooldown_remaining(), 0);

        assert_eq!(c.classify(&open_palm()), GestureKind::Fist);
        assert_eq!(c.classify(&open_palm()), GestureKind::Fist);
        assert_eq!(c.classify(&open_palm()), GestureKind::OpenPalm);
    }

    #[test]
    fn cooldown_ignores_raw_input() {
        let cfg = GestureConfig { cooldown_frames: 3, ..Default::default() };
        let mut c = GestureClassifier::with_config(cfg);
        for _ in 0..3 {
            c.classify(&pointing());
        }
        for _ in 0..3 {
            assert_eq!(c.classify(&pinch()), GestureKind::Pointing);
        }
    }

    #[test]
    fn live_threshold_change_shrinks_window() {
        let cell = ConfigCell::new(GestureConfig { cooldown_frames: 0, ..Default::default() });
        let mut c = GestureClassifier::new(cell.clone());
        c.classify(&fist());
        c.classify(&fist());
        cell.store(GestureConfig {
            hysteresis_frames: 1,
            cooldown_frames: 0,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(c.classify(&open_palm()), GestureKind::OpenPalm);
    }

    #[test]
    fn reset_returns_to_none() {
        let mut c = classifier();
        for _ in 0..3 {
            c.classify(&fist());
        }
        c.reset();
        assert_eq!(c.confirmed(), GestureKind::None);
        assert_eq!(c.cooldown_remaining(), 0);
    }
}
