//! Link to the external trigger synchroniser.
//!
//! The synchroniser fires the hardware trigger shared by all cameras and
//! reports its state as text messages. Messages are timestamped on receipt
//! and queued on a bounded inbox that the session supervisor polls.

mod bridge;
mod emulated;
mod error;
mod handshake;
mod matcher;

pub use bridge::{LinkState, SerialSynchroniserFactory, SynchroniserBridge};
pub use emulated::{EmulatedSynchroniser, EmulatedSynchroniserFactory, MessageInjector};
pub use error::TriggerError;
pub use handshake::expect_marker;
pub use matcher::{DeviceMatcher, PortInfo, SysfsPortLocator};

use std::time::Duration;

use camsync_ipc::SynchroniserConfig;
use chrono::Local;

/// Device has begun firing triggers.
pub const START_MARKER: &str = "[START]";

/// Device requests a file-rotation boundary.
pub const STOP_ROLLOVER_MARKER: &str = "[STOP_ROLLOVER]";

/// Device has fully stopped firing.
pub const STOP_PERMANENT_MARKER: &str = "[STOP_PERMANENT]";

/// Capacity of the message inbox.
pub const INBOX_CAPACITY: usize = 256;

/// Result type for synchroniser operations.
pub type TriggerResult<T> = Result<T, TriggerError>;

/// One message reported by the synchroniser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncMessage {
    /// Local receive time, ISO-8601.
    pub timestamp: String,

    /// Message text as sent by the device.
    pub text: String,
}

impl SyncMessage {
    /// Stamp `text` with the current local time.
    pub fn now(text: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            text: text.into(),
        }
    }

    /// Case-sensitive substring match of a protocol marker.
    pub fn contains(&self, marker: &str) -> bool {
        self.text.contains(marker)
    }
}

/// A connected synchroniser.
pub trait Synchroniser: Send {
    /// Arm the device so it begins firing triggers.
    fn start(&mut self) -> TriggerResult<()>;

    /// Disarm the device.
    fn stop(&mut self) -> TriggerResult<()>;

    /// Wait up to `timeout` for the next message.
    fn poll(&mut self, timeout: Duration) -> Option<SyncMessage>;

    /// Next message if one is already queued.
    fn try_poll(&mut self) -> Option<SyncMessage>;

    /// Fails once the link to the device is gone.
    fn check_link(&self) -> TriggerResult<()> {
        Ok(())
    }

    /// Empty the backlog without blocking.
    fn drain(&mut self) -> Vec<SyncMessage> {
        let mut backlog = Vec::new();
        while let Some(message) = self.try_poll() {
            backlog.push(message);
        }
        backlog
    }
}

/// Connects synchronisers.
pub trait SynchroniserFactory: Send + Sync {
    /// Locate and connect the device described by `config`.
    fn connect(&self, config: &SynchroniserConfig) -> TriggerResult<Box<dyn Synchroniser>>;
}
