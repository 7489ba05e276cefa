//! Commands sent from the controller to the recorder.

use serde::{Deserialize, Serialize};

use crate::types::SessionConfig;

/// Commands that a controller can send to the recorder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RecorderCommand {
    /// Start a recording session with the given configuration.
    Start { config: SessionConfig },

    /// Stop the current session.
    Stop,

    /// Request current session state.
    GetState,

    /// Stop any session and shut the recorder down.
    Shutdown,
}
