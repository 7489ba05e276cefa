//! Events sent from the recorder to the controller.

use serde::{Deserialize, Serialize};

use crate::state::SessionState;
use crate::types::{CameraInfo, SegmentStats, SessionSummary};

/// Events that the recorder can send to the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RecorderEvent {
    /// Session state has changed.
    StateChanged {
        /// Previous state.
        previous: Box<SessionState>,

        /// Current state.
        current: Box<SessionState>,
    },

    /// Cameras captured for this session.
    CamerasFound(Vec<CameraInfo>),

    /// A segment was closed (rollover or stop).
    SegmentCompleted(SegmentStats),

    /// Message received from the synchroniser.
    SynchroniserMessage {
        /// Local ISO-8601 timestamp assigned on receipt.
        timestamp: String,

        /// Raw message text.
        text: String,
    },

    /// Session ended and all resources were released.
    SessionFinished(SessionSummary),

    /// Error occurred.
    Error {
        /// Whether the error ended the session.
        fatal: bool,

        /// Error message.
        message: String,
    },

    /// Recorder is ready for commands.
    Ready,

    /// Recorder has shut down.
    Shutdown,
}
