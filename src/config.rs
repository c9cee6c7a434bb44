// Settings for every part of the engine.
//
// Defaults reproduce the tuned constants the drawing app ships with. A JSON
// settings file may override any subset of fields; everything is checked by
// `Config::validate` before use.
//
// Thresholds that the presentation layer may tweak while the capture worker
// runs live in a `ConfigCell`: writers swap in a whole new validated value,
// readers grab the current `Arc` snapshot.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gesture: GestureConfig,
    pub canvas: CanvasConfig,
    pub coordinator: CoordinatorConfig,
    pub capture: CaptureConfig,
}

impl Config {
    /// Read a JSON settings file. Missing fields keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| Error::ConfigIo(format!("{}: {e}", path.display())))?;
        let cfg: Config = serde_json::from_str(&content)
            .map_err(|e| Error::ConfigIo(format!("{}: {e}", path.display())))?;
        cfg.validate()?;
        info!(path = %path.display(), "loaded settings");
        Ok(cfg)
    }

    /// Like [`Config::load`] but falls back to defaults when the file is absent or bad.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(error = %e, "using default settings");
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.gesture.validate()?;
        self.canvas.validate()?;
        self.coordinator.validate()?;
        self.capture.validate()
    }
}

/// Classifier thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureConfig {
    /// Consecutive identical raw readings needed before a change is accepted.
    pub hysteresis_frames: usize,
    /// Calls after a change during which reclassification is suspended.
    pub cooldown_frames: u32,
    /// Pinch when thumb-index distance < hand_scale * pinch_ratio.
    pub pinch_ratio: f32,
    /// Finger extended when wrist-tip > wrist-mcp * extended_ratio.
    pub extended_ratio: f32,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            hysteresis_frames: 3,
            cooldown_frames: 5,
            pinch_ratio: 0.3,
            extended_ratio: 1.2,
        }
    }
}

impl GestureConfig {
    pub fn validate(&self) -> Result<()> {
        if self.hysteresis_frames == 0 {
            return Err(Error::InvalidConfig("hysteresis_frames must be at least 1".into()));
        }
        positive("pinch_ratio", self.pinch_ratio)?;
        positive("extended_ratio", self.extended_ratio)
    }
}

/// Canvas geometry, brush and history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasConfig {
    /// Model-resolution buffer (width, height).
    pub size: (u32, u32),
    /// Size of the derived display view.
    pub display_size: (u32, u32),
    pub background: [u8; 3],
    pub brush_color: [u8; 3],
    pub brush_thickness: u32,
    /// Interpolated sub-steps per Catmull-Rom segment.
    pub spline_segments: usize,
    /// Stretch applied to normalized y before clamping (gestures rarely reach the frame bottom).
    pub aspect_correction: f32,
    pub max_history: usize,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            size: (1024, 1024),
            display_size: (1280, 720),
            background: [255, 255, 255],
            brush_color: [0, 0, 0],
            brush_thickness: 3,
            spline_segments: 5,
            aspect_correction: 1.2,
            max_history: 50,
        }
    }
}

impl CanvasConfig {
    pub fn validate(&self) -> Result<()> {
        if self.size.0 == 0 || self.size.1 == 0 {
            return Err(Error::InvalidConfig("canvas size must be non-zero".into()));
        }
        if self.display_size.0 == 0 || self.display_size.1 == 0 {
            return Err(Error::InvalidConfig("display size must be non-zero".into()));
        }
        if self.spline_segments == 0 {
            return Err(Error::InvalidConfig("spline_segments must be at least 1".into()));
        }
        if self.max_history == 0 {
            return Err(Error::InvalidConfig("max_history must be at least 1".into()));
        }
        positive("aspect_correction", self.aspect_correction)
    }
}

/// Queue sizes, timeouts and session pacing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub queue_capacity: usize,
    #[serde(with = "millis")]
    pub dequeue_timeout: Duration,
    #[serde(with = "millis")]
    pub result_ttl: Duration,
    #[serde(with = "millis")]
    pub sweep_interval: Duration,
    /// How long an open palm must be held before the canvas clears.
    #[serde(with = "millis")]
    pub clear_hold: Duration,
    /// Sleep between gate checks while tracking is paused.
    #[serde(with = "millis")]
    pub pause_poll: Duration,
    #[serde(with = "millis")]
    pub shutdown_timeout: Duration,
    pub inference_steps: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 5,
            dequeue_timeout: Duration::from_millis(500),
            result_ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
            clear_hold: Duration::from_secs(1),
            pause_poll: Duration::from_millis(100),
            shutdown_timeout: Duration::from_secs(5),
            inference_steps: 4,
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(Error::InvalidConfig("queue_capacity must be at least 1".into()));
        }
        if self.inference_steps == 0 {
            return Err(Error::InvalidConfig("inference_steps must be at least 1".into()));
        }
        Ok(())
    }
}

/// Camera request and landmark smoothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub camera_index: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Flip frames horizontally so the preview behaves like a mirror.
    pub mirror: bool,
    /// EMA factor for landmark smoothing; lower = smoother, more lag.
    pub smoothing_alpha: f32,
    /// Feed blank frames instead of opening a camera.
    pub synthetic: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            camera_index: 0,
            width: 640,
            height: 480,
            fps: 30,
            mirror: true,
            smoothing_alpha: 0.3,
            synthetic: false,
        }
    }
}

impl CaptureConfig {
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 || self.fps == 0 {
            return Err(Error::InvalidConfig("capture size and fps must be non-zero".into()));
        }
        if !(self.smoothing_alpha > 0.0 && self.smoothing_alpha <= 1.0) {
            return Err(Error::InvalidConfig("smoothing_alpha must be in (0, 1]".into()));
        }
        Ok(())
    }
}

fn positive(name: &str, v: f32) -> Result<()> {
    if v.is_finite() && v > 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!("{name} must be a positive number, got {v}")))
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/* ---------- ConfigCell : versioned copy-on-write snapshot ---------- */

/// Shared, swappable settings value.
///
/// Cloning the cell shares it. `load()` never observes a half-written value:
/// a store replaces the whole `Arc` under a write lock held only for the swap.
pub struct ConfigCell<T> {
    inner: Arc<CellInner<T>>,
}

struct CellInner<T> {
    value: RwLock<Arc<T>>,
    version: AtomicU64,
}

impl<T> Clone for ConfigCell<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T> ConfigCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(CellInner {
                value: RwLock::new(Arc::new(value)),
                version: AtomicU64::new(0),
            }),
        }
    }

    pub fn load(&self) -> Arc<T> {
        Arc::clone(&self.inner.value.read())
    }

    /// Current snapshot plus the version it belongs to.
    pub fn load_versioned(&self) -> (u64, Arc<T>) {
        let guard = self.inner.value.read();
        (self.inner.version.load(Ordering::Acquire), Arc::clone(&guard))
    }

    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::Acquire)
    }

    fn replace(&self, value: T) {
        let value = Arc::new(value);
        let mut guard = self.inner.value.write();
        *guard = value;
        self.inner.version.fetch_add(1, Ordering::AcqRel);
    }
}

impl ConfigCell<GestureConfig> {
    /// Validate and publish new classifier thresholds.
    pub fn store(&self, value: GestureConfig) -> Result<()> {
        value.validate()?;
        info!(?value, "gesture thresholds updated");
        self.replace(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_hysteresis_is_rejected() {
        let cfg = GestureConfig { hysteresis_frames: 0, ..Default::default() };
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn nan_ratio_is_rejected() {
        let cfg = GestureConfig { pinch_ratio: f32::NAN, ..Default::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: Config = serde_json::from_str(
            r#"{ "gesture": { "cooldown_frames": 9 }, "coordinator": { "dequeue_timeout": 250 } }"#,
        )
        .unwrap();
        assert_eq!(cfg.gesture.cooldown_frames, 9);
        assert_eq!(cfg.gesture.hysteresis_frames, 3);
        assert_eq!(cfg.coordinator.dequeue_timeout, Duration::from_millis(250));
        assert_eq!(cfg.canvas.size, (1024, 1024));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = Config::load("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, Error::ConfigIo(_)));
    }

    #[test]
    fn cell_store_bumps_version_and_rejects_invalid() {
        let cell = ConfigCell::new(GestureConfig::default());
        let reader = cell.clone();
        assert_eq!(reader.version(), 0);

        cell.store(GestureConfig { cooldown_frames: 1, ..Default::default() }).unwrap();
        let (v, snap) = reader.load_versioned();
        assert_eq!(v, 1);
        assert_eq!(snap.cooldown_frames, 1);

        let bad = GestureConfig { hysteresis_frames: 0, ..Default::default() };
        assert!(cell.store(bad).is_err());
        assert_eq!(reader.version(), 1);
    }
}
