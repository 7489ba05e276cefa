//! Error types for the capture module.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during capture operations.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Camera not found.
    #[error("Camera not found: {0}")]
    DeviceNotFound(String),

    /// A setting could not be applied.
    #[error("Camera {serial} rejected settings: {message}")]
    Settings { serial: String, message: String },

    /// No frame arrived within the retrieval timeout.
    #[error("Camera {serial} produced no frame within {timeout:?}")]
    RetrievalTimeout { serial: String, timeout: Duration },

    /// Retrieval attempted before `start_grabbing`.
    #[error("Camera {0} is not grabbing")]
    NotGrabbing(String),

    /// Device lost during capture.
    #[error("Camera {0} lost")]
    DeviceLost(String),

    /// Vendor backend error.
    #[error("Camera backend error: {0}")]
    Backend(String),
}

impl CaptureError {
    /// Returns true for a retrieval timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::RetrievalTimeout { .. })
    }
}
