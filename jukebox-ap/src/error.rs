//! Error types for jukebox-ap
//!
//! Defines module-specific error types using thiserror for clear error propagation.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for jukebox-ap
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted document (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// NFC reader hardware errors
    #[error("Reader error: {0}")]
    Reader(#[from] ReaderError),

    /// Bluetooth adapter operation failed (scan/pair/connect/...)
    #[error("Adapter error: {0}")]
    Adapter(String),

    /// Play requested while no sink is connected
    #[error("No sink available")]
    NoSinkAvailable,

    /// Player process could not be launched or supervised
    #[error("Playback error: {0}")]
    Playback(String),

    /// Media file does not exist
    #[error("Media file not found: {}", .0.display())]
    MediaNotFound(PathBuf),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// A worker task is gone (service shutting down)
    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<jukebox_common::Error> for Error {
    fn from(e: jukebox_common::Error) -> Self {
        match e {
            jukebox_common::Error::Io(e) => Error::Io(e),
            jukebox_common::Error::Json(e) => Error::Json(e),
            jukebox_common::Error::InvalidInput(msg) => Error::BadRequest(msg),
            jukebox_common::Error::NotFound(msg) => Error::NotFound(msg),
            jukebox_common::Error::Config(msg) => Error::Config(msg),
            other => Error::Internal(other.to_string()),
        }
    }
}

/// Hardware read failures
///
/// Every variant is transient from the poller's point of view: it is
/// logged, backed off, and retried.
#[derive(Error, Debug)]
pub enum ReaderError {
    /// Serial port I/O error
    #[error("serial I/O: {0}")]
    Io(#[from] std::io::Error),

    /// No (complete) response within the per-attempt timeout
    #[error("read timed out")]
    Timeout,

    /// Frame structure invalid (missing start code, length mismatch, ...)
    #[error("malformed frame: {0}")]
    Frame(String),

    /// Length or data checksum mismatch
    #[error("checksum mismatch")]
    Checksum,

    /// Reader answered with a NACK frame
    #[error("reader sent NACK")]
    Nack,

    /// Response did not match the command sent
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// Convenience Result type using jukebox-ap Error
pub type Result<T> = std::result::Result<T, Error>;
