//! Recording engine for camsync.
//!
//! This crate ties cameras, video sinks and the synchroniser together into
//! segmented recording sessions driven by a command channel.

mod channel;
mod error;
mod logger;
mod naming;
mod preview;
mod recorder;
mod stats;
mod supervisor;

pub use channel::{CaptureChannel, ChannelExit, ChannelParams, ChannelParts, RunningChannel};
pub use error::RecorderError;
pub use logger::{human_duration, local_iso_now, SessionLogger};
pub use naming::{timestamp_now, SessionPaths, STAMP_FORMAT};
pub use preview::{NullPreview, PreviewSurface, TracingPreview};
pub use recorder::Recorder;
pub use stats::{format_counts, recorded_line, SessionTally};
pub use supervisor::{Backends, SessionSupervisor};

use camsync_ipc::{RecorderCommand, RecorderEvent};
use crossbeam_channel::{Receiver, Sender};

/// Result type for engine operations.
pub type RecorderResult<T> = Result<T, RecorderError>;

/// Create a recorder instance with IPC channels.
pub fn create_recorder(
    command_rx: Receiver<RecorderCommand>,
    event_tx: Sender<RecorderEvent>,
    backends: Backends,
) -> Recorder {
    Recorder::new(command_rx, event_tx, backends)
}
