//! Session state machine types.

use serde::{Deserialize, Serialize};

/// The current state of a recording session.
///
/// `Idle → Enumerating → StartingSegment → Arming (synchroniser only) →
/// Running → RollingOver → StartingSegment … → Stopping → Stopped`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum SessionState {
    /// No session has been started.
    #[default]
    Idle,

    /// Looking for cameras.
    Enumerating,

    /// Opening devices and sinks for a segment.
    StartingSegment {
        /// Zero-based segment index.
        segment: u32,
    },

    /// Waiting for every camera to arm, then starting the synchroniser.
    Arming {
        /// Zero-based segment index.
        segment: u32,
    },

    /// Capturing and writing frames.
    Running {
        /// Zero-based segment index.
        segment: u32,
    },

    /// Closing the current segment's files before opening the next.
    RollingOver {
        /// Index of the segment being closed.
        segment: u32,
    },

    /// Releasing all session resources.
    Stopping {
        /// Reason for stopping.
        reason: StopReason,
    },

    /// Terminal state. A new session needs a fresh supervisor.
    Stopped,
}

impl SessionState {
    /// Returns true if no session has been started.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns true while frames are being recorded.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }

    /// Returns true between session start and the first running tick.
    pub fn is_starting(&self) -> bool {
        matches!(
            self,
            Self::Enumerating | Self::StartingSegment { .. } | Self::Arming { .. }
        )
    }

    /// Returns true if the session is shutting down.
    pub fn is_stopping(&self) -> bool {
        matches!(self, Self::Stopping { .. })
    }

    /// Returns true once the session has ended.
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// Returns the segment index the state refers to, if any.
    pub fn segment(&self) -> Option<u32> {
        match self {
            Self::StartingSegment { segment }
            | Self::Arming { segment }
            | Self::Running { segment }
            | Self::RollingOver { segment } => Some(*segment),
            _ => None,
        }
    }

    /// Returns a simple string representation of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Enumerating => "Enumerating",
            Self::StartingSegment { .. } => "StartingSegment",
            Self::Arming { .. } => "Arming",
            Self::Running { .. } => "Running",
            Self::RollingOver { .. } => "RollingOver",
            Self::Stopping { .. } => "Stopping",
            Self::Stopped => "Stopped",
        }
    }
}

/// Reason for stopping a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StopReason {
    /// Operator requested stop.
    OperatorRequested,

    /// Segment setup failed (device settings, sink open, arming).
    SetupFailed { message: String },

    /// A running channel died.
    ChannelFailed { serial: String, message: String },

    /// The synchroniser could not be reached or did not confirm.
    SynchroniserFailed { message: String },
}

impl StopReason {
    /// Returns a display message for this reason.
    pub fn message(&self) -> String {
        match self {
            Self::OperatorRequested => "Recording stopped by operator".to_string(),
            Self::SetupFailed { message } => format!("Segment setup failed: {message}"),
            Self::ChannelFailed { serial, message } => {
                format!("Camera {serial} failed: {message}")
            }
            Self::SynchroniserFailed { message } => format!("Synchroniser failed: {message}"),
        }
    }

    /// Returns true if the stop was not requested by the operator.
    pub fn is_error(&self) -> bool {
        !matches!(self, Self::OperatorRequested)
    }
}
