//! Error types for the trigger module.

use thiserror::Error;

/// Errors that can occur while talking to the synchroniser.
#[derive(Debug, Error)]
pub enum TriggerError {
    /// No attached device matched.
    #[error("Synchroniser not found: {0}")]
    NotFound(String),

    /// Matcher string could not be parsed.
    #[error("Invalid device matcher: {0}")]
    InvalidMatcher(String),

    /// Expected marker did not arrive in time.
    #[error("Synchroniser did not confirm {marker}")]
    HandshakeFailed { marker: String },

    /// Link to the device went away.
    #[error("Synchroniser disconnected")]
    Disconnected,

    /// Reading from the device failed.
    #[error("Synchroniser link failed: {0}")]
    LinkFailed(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
