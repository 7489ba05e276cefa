//! Error types for recording sessions.

use std::time::Duration;

use camsync_capture::CaptureError;
use camsync_encoder::EncoderError;
use camsync_ipc::StopReason;
use camsync_trigger::TriggerError;
use thiserror::Error;

/// Errors that end or prevent a recording session.
#[derive(Debug, Error)]
pub enum RecorderError {
    /// No camera showed up within the enumeration timeout.
    #[error("Cannot start: no camera found")]
    DeviceNotFound,

    /// A camera rejected its settings.
    #[error("Camera {serial} settings failed: {source}")]
    DeviceSettings {
        serial: String,
        #[source]
        source: CaptureError,
    },

    /// A video file could not be opened.
    #[error("Cannot open video file for {serial}: {source}")]
    SinkOpen {
        serial: String,
        #[source]
        source: EncoderError,
    },

    /// A running camera stopped delivering frames.
    #[error("Camera {serial} delivered no frame within {timeout:?}")]
    ChannelRetrievalTimeout { serial: String, timeout: Duration },

    /// A capture thread ended on its own.
    #[error("Camera {serial} failed: {message}")]
    ChannelFailed { serial: String, message: String },

    /// The synchroniser could not be connected.
    #[error("Synchroniser not found: {source}")]
    SynchroniserNotFound {
        #[source]
        source: TriggerError,
    },

    /// The synchroniser did not confirm a command.
    #[error("Problem with the synchroniser: no {marker} confirmation")]
    SynchroniserHandshakeFailed { marker: String },

    /// The link to the synchroniser broke during the session.
    #[error("Lost the synchroniser: {source}")]
    SynchroniserLost {
        #[source]
        source: TriggerError,
    },

    /// Cameras did not report waiting for trigger in time.
    #[error("Cameras not armed: {}", .pending.join(", "))]
    ArmingTimeout { pending: Vec<String> },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A session is already running.
    #[error("A recording session is already running")]
    AlreadyRunning,
}

impl RecorderError {
    /// Stop reason recorded for a session ended by this error.
    pub fn stop_reason(&self) -> StopReason {
        match self {
            Self::ChannelRetrievalTimeout { serial, .. } | Self::ChannelFailed { serial, .. } => {
                StopReason::ChannelFailed {
                    serial: serial.clone(),
                    message: self.to_string(),
                }
            }
            Self::SynchroniserNotFound { .. }
            | Self::SynchroniserHandshakeFailed { .. }
            | Self::SynchroniserLost { .. } => {
                StopReason::SynchroniserFailed {
                    message: self.to_string(),
                }
            }
            _ => StopReason::SetupFailed {
                message: self.to_string(),
            },
        }
    }
}
