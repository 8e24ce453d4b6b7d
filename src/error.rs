//! Error types for each pipeline stage.
//!
//! Stage failures travel by return value. The scan loop decides what is fatal
//! (construction) and what is retried (everything mid-loop).

use thiserror::Error;

/// Sensor acquisition failures.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("sensor is not open")]
    NotOpen,
    #[error("sensor returned no usable color+depth pair")]
    Incomplete,
    #[error("sensor failure: {0}")]
    Device(String),
    #[error("sensor lock poisoned")]
    Poisoned,
}

/// Scene-understanding failures. Malformed model output is not an error; it
/// is replaced by fallback detections.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("scene model failed: {0}")]
    Model(String),
    #[error("scene model unavailable: {0}")]
    Unavailable(String),
    #[error("scene model lock poisoned")]
    Poisoned,
}

/// Result sink failures. Logged by the scan loop, never propagated.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("publish error: {0}")]
    Publish(String),
    #[error("sink misconfigured: {0}")]
    Config(String),
}

/// Failure of one scan cycle or of a processor lifecycle step.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("capture failed: {0}")]
    Capture(#[from] CaptureError),
    #[error("analysis failed: {0}")]
    Analysis(#[from] AnalysisError),
    #[error("failed to spawn worker: {0}")]
    Spawn(#[from] std::io::Error),
}
