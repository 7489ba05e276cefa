//! Typed controller<->recorder messages for camsync.
//!
//! This crate defines the message types used between an operator surface
//! (CLI, GUI) and the recording engine, plus the configuration and
//! statistics records that travel inside them.

mod commands;
mod events;
mod state;
mod types;

pub use commands::RecorderCommand;
pub use events::RecorderEvent;
pub use state::{SessionState, StopReason};
pub use types::{
    CameraInfo, PixelFormat, RetrievalTimeoutPolicy, SegmentStats, SessionConfig, SessionSummary,
    SynchroniserConfig, UnknownPixelFormat,
};

use crossbeam_channel::{Receiver, Sender};

/// Channel capacity for commands (controller → recorder).
pub const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Channel capacity for events (recorder → controller).
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Creates a bounded command channel.
pub fn command_channel() -> (Sender<RecorderCommand>, Receiver<RecorderCommand>) {
    crossbeam_channel::bounded(COMMAND_CHANNEL_CAPACITY)
}

/// Creates a bounded event channel.
pub fn event_channel() -> (Sender<RecorderEvent>, Receiver<RecorderEvent>) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY)
}
