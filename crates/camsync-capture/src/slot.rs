//! Latest-wins frame hand-off from a capture thread to the preview.

use parking_lot::Mutex;

use crate::frame::Frame;

/// Holds at most one frame. A new frame replaces an unread one.
///
/// Staleness is fine for preview. The write path never goes through a
/// slot.
#[derive(Debug, Default)]
pub struct FrameSlot {
    latest: Mutex<Option<Frame>>,
}

impl FrameSlot {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `frame`. Returns true if an unread frame was discarded.
    pub fn put(&self, frame: Frame) -> bool {
        self.latest.lock().replace(frame).is_some()
    }

    /// Take the latest frame, leaving the slot empty.
    pub fn take(&self) -> Option<Frame> {
        self.latest.lock().take()
    }

    /// Discard any unread frame.
    pub fn clear(&self) {
        self.latest.lock().take();
    }

    /// Returns true if no unread frame is held.
    pub fn is_empty(&self) -> bool {
        self.latest.lock().is_none()
    }
}
