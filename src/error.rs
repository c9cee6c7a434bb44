// One error type for the whole crate.
// Every variant states *where* things went wrong.
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("Window init error: {0}")]
    WindowInit(String), // Creating the window failed
    #[error("Window update error: {0}")]
    WindowUpdate(String), // Updating the window buffer failed
    #[error("Camera init error: {0}")]
    CameraInit(String), // Opening/starting the camera failed
    #[error("Camera frame error: {0}")]
    CameraFrame(String), // Grabbing/decoding a frame failed
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String), // A threshold or size failed validation
    #[error("Config file error: {0}")]
    ConfigIo(String), // Reading/parsing the settings file failed
    #[error("Unknown style: {0}")]
    UnknownStyle(String), // Generation asked for a preset we don't have
    #[error("Worker spawn error: {0}")]
    WorkerSpawn(String), // The OS refused to start a worker thread
    #[error("Invalid landmarks: expected 21 points, got {0}")]
    InvalidLandmarks(usize), // A hand came back with the wrong number of points
}

pub type Result<T> = std::result::Result<T, Error>;
