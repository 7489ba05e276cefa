//! Captured frame types.

use bytes::Bytes;
use std::time::Instant;

use camsync_ipc::PixelFormat;

/// Timestamp for a captured frame.
#[derive(Debug, Clone, Copy)]
pub struct CaptureTimestamp {
    /// Monotonic timestamp when the frame was captured.
    pub capture_time: Instant,

    /// Time since acquisition start in 100ns units.
    pub pts_100ns: u64,
}

impl CaptureTimestamp {
    /// Create a new capture timestamp.
    pub fn now(start_time: Instant) -> Self {
        let capture_time = Instant::now();
        let elapsed = capture_time.duration_since(start_time);
        let pts_100ns = elapsed.as_nanos() as u64 / 100;

        Self {
            capture_time,
            pts_100ns,
        }
    }

    /// Get the presentation timestamp in milliseconds.
    pub fn pts_ms(&self) -> u64 {
        self.pts_100ns / 10_000
    }
}

/// A captured video frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Raw pixel data.
    pub data: Bytes,

    /// Frame width in pixels.
    pub width: u32,

    /// Frame height in pixels.
    pub height: u32,

    /// Layout of `data`.
    pub pixel_format: PixelFormat,

    /// Capture timestamp.
    pub timestamp: CaptureTimestamp,

    /// Device frame counter.
    pub sequence: u64,
}

impl Frame {
    /// Create a new frame.
    pub fn new(
        data: Bytes,
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        timestamp: CaptureTimestamp,
        sequence: u64,
    ) -> Self {
        Self {
            data,
            width,
            height,
            pixel_format,
            timestamp,
            sequence,
        }
    }

    /// Validate that the frame data matches its dimensions.
    pub fn is_valid(&self) -> bool {
        self.data.len() == self.pixel_format.frame_size(self.width, self.height)
    }
}

/// Read the little-endian sequence number emulated cameras embed in the
/// first eight bytes of every frame.
pub fn read_sequence_marker(data: &[u8]) -> Option<u64> {
    let head: [u8; 8] = data.get(..8)?.try_into().ok()?;
    Some(u64::from_le_bytes(head))
}
