// Gesture-driven drawing engine.
//
// A capture worker turns camera frames into hand landmarks and debounced
// gestures; the consumer applies them to a canvas with smoothed strokes and
// region-based undo; a generation worker styles canvas snapshots in the
// background.
//
// Start from `session::Session`.

pub mod camera;
pub mod canvas;
pub mod config;
pub mod coordinator;
pub mod draw;
pub mod error;
pub mod gesture;
pub mod landmarks;
pub mod session;
pub mod spline;
pub mod style;
pub mod types;
pub mod undo;

pub use error::{Error, Result};
