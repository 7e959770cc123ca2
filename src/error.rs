//! src/error.rs

use thiserror::Error;

/// Failures the detection engine reports to its caller.
///
/// There is no variant for fingerprints of different lengths: the scorer answers
/// with the maximum distance instead (see `similarity::MAX_DISTANCE`).
#[derive(Error, Debug)]
pub enum Error {
    /// No input device, or the device refused to open. Reported once, never retried.
    #[error("audio capture unavailable: {0}")]
    CaptureUnavailable(String),
    /// An imported waveform could not be decoded. The stored reference is left alone.
    #[error("could not decode audio: {0}")]
    DecodeFailure(String),
    /// A detection event could not be delivered to a sink.
    #[error("event delivery failed: {0}")]
    DeliveryFailure(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
