//! Error types for the encoder module.

use std::path::PathBuf;

use camsync_ipc::PixelFormat;
use thiserror::Error;

/// Errors that can occur while writing video.
#[derive(Debug, Error)]
pub enum EncoderError {
    /// The encoder has no raw format for this pixel layout.
    #[error("Unsupported pixel format for encoding: {0}")]
    UnsupportedPixelFormat(PixelFormat),

    /// Output location cannot be written.
    #[error("Cannot write to {}", .0.display())]
    UnwritablePath(PathBuf),

    /// Encoder process could not be started.
    #[error("Failed to start encoder {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Invalid input data.
    #[error("Invalid input data: {0}")]
    InvalidInput(String),

    /// Encoder process went away while frames were still coming.
    #[error("Encoder for {} exited unexpectedly", .0.display())]
    EncoderExited(PathBuf),

    /// Encoder process finished with an error status.
    #[error("Encoder for {} failed: {status}", .path.display())]
    EncoderFailed { path: PathBuf, status: String },

    /// Write after close.
    #[error("Sink already closed")]
    Closed,

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
