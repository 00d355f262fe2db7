//! Error types for the playback engine
//!
//! Defines module-specific error types using thiserror for clear error
//! propagation. Errors are `Clone` because the decoder and player controls
//! stash the most recent failure and hand copies to any client that asks.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::audio::format::SampleFormat;

/// Main error type for the playback engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The decoder failed to decode the song (mid-stream decode error)
    #[error("Decoder error: {0}")]
    Decoder(String),

    /// No decoder plugin accepts the stream
    #[error("No decoder plugin matches {0}")]
    UnsupportedUri(String),

    /// File open/read error during decoder startup
    #[error("Failed to read {}: {message}", .path.display())]
    FileRead { path: PathBuf, message: String },

    /// Audio output device errors (open or play failed)
    #[error("Audio output error: {0}")]
    Output(String),

    /// Seek rejected because the decoder cannot reposition this stream
    #[error("Not seekable")]
    SeekUnsupported,

    /// Seek target lies past the end of the song
    #[error("Seek position {}s is past the end of the song", .0.as_secs_f64())]
    SeekOutOfRange(Duration),

    /// Cross-fade attempted across incompatible sample formats
    #[error("Cannot cross-fade sample format {0}")]
    FormatMismatch(SampleFormat),

    /// Operation not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Convenience Result type using the engine's Error
pub type Result<T> = std::result::Result<T, Error>;
