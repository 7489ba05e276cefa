//! Common types used across IPC messages.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::StopReason;

/// Configuration for one recording session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Directory for videos and the session log.
    pub output_dir: PathBuf,

    /// Session file-name prefix. Defaults to the local start time
    /// formatted as `%Y-%m-%d_%H-%M-%S`.
    pub file_prefix: Option<String>,

    /// Put every file of the session under `<output_dir>/<prefix>/`.
    pub session_subdirectory: bool,

    /// Frame width in pixels.
    pub width: u32,

    /// Frame height in pixels.
    pub height: u32,

    /// Horizontal sensor offset.
    pub offset_x: u32,

    /// Vertical sensor offset.
    pub offset_y: u32,

    /// Nominal free-run frame rate requested from each camera.
    pub frame_rate: f64,

    /// Sensor pixel format.
    pub pixel_format: PixelFormat,

    /// Exposure time in microseconds (auto exposure is always off).
    pub exposure_us: u32,

    /// Video container extension, without the dot.
    pub container: String,

    /// How long to keep enumerating before giving up (ms).
    pub enumeration_timeout_ms: u64,

    /// Upper bound on cameras used in one session.
    pub max_cameras: usize,

    /// Per-frame wait in free-run mode (ms).
    pub free_run_retrieve_timeout_ms: u64,

    /// Per-frame wait in synchroniser-gated mode (ms).
    pub triggered_retrieve_timeout_ms: u64,

    /// Idle wait between preview ticks without a synchroniser (ms).
    pub preview_interval_ms: u64,

    /// Idle wait between inbox polls with a synchroniser (ms).
    pub synchroniser_poll_interval_ms: u64,

    /// Longest wait for every camera to report armed (ms).
    pub arming_timeout_ms: u64,

    /// What a capture timeout on a running channel does.
    pub retrieval_timeout_policy: RetrievalTimeoutPolicy,

    /// External trigger device. `None` records free-running.
    pub synchroniser: Option<SynchroniserConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("recordings"),
            file_prefix: None,
            session_subdirectory: false,
            width: 1936,
            height: 1216,
            offset_x: 0,
            offset_y: 0,
            frame_rate: 30.0,
            pixel_format: PixelFormat::Mono8,
            exposure_us: 20_000,
            container: "avi".to_string(),
            enumeration_timeout_ms: 5_000,
            max_cameras: 30,
            free_run_retrieve_timeout_ms: 500,
            triggered_retrieve_timeout_ms: 5_000,
            preview_interval_ms: 750,
            synchroniser_poll_interval_ms: 1,
            arming_timeout_ms: 10_000,
            retrieval_timeout_policy: RetrievalTimeoutPolicy::default(),
            synchroniser: None,
        }
    }
}

impl SessionConfig {
    /// Returns true if frame acquisition is gated by a synchroniser.
    pub fn is_synchronised(&self) -> bool {
        self.synchroniser.is_some()
    }

    /// Per-frame retrieval timeout for the configured acquisition mode.
    pub fn retrieve_timeout(&self) -> Duration {
        if self.is_synchronised() {
            Duration::from_millis(self.triggered_retrieve_timeout_ms)
        } else {
            Duration::from_millis(self.free_run_retrieve_timeout_ms)
        }
    }

    /// Enumeration timeout as a duration.
    pub fn enumeration_timeout(&self) -> Duration {
        Duration::from_millis(self.enumeration_timeout_ms)
    }

    /// Idle wait between supervisor ticks.
    pub fn tick_interval(&self) -> Duration {
        if self.is_synchronised() {
            Duration::from_millis(self.synchroniser_poll_interval_ms)
        } else {
            Duration::from_millis(self.preview_interval_ms)
        }
    }

    /// Arming timeout as a duration.
    pub fn arming_timeout(&self) -> Duration {
        Duration::from_millis(self.arming_timeout_ms)
    }
}

/// Configuration for the external trigger device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynchroniserConfig {
    /// Device matcher, e.g. `"VID:PID=16C0:0483 SER=13567420"`.
    pub matcher: String,

    /// Trigger pulse frequency in Hz. Also the frame rate written to
    /// every video file of a synchronised session.
    pub frame_rate: f64,

    /// Wait for `[START]` / `[STOP_PERMANENT]` confirmations (ms).
    pub handshake_timeout_ms: u64,

    /// Line written to arm the device.
    pub start_command: String,

    /// Line written to disarm the device.
    pub stop_command: String,
}

impl Default for SynchroniserConfig {
    fn default() -> Self {
        Self {
            matcher: "VID:PID=16C0:0483".to_string(),
            frame_rate: 30.0,
            handshake_timeout_ms: 3_000,
            start_command: "START".to_string(),
            stop_command: "STOP".to_string(),
        }
    }
}

impl SynchroniserConfig {
    /// Handshake timeout as a duration.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

/// What happens when a running channel's frame wait times out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalTimeoutPolicy {
    /// Stop the whole session.
    #[default]
    AbortSession,

    /// Close the current segment for all cameras and open a new one.
    RestartSegment,

    /// Log and keep waiting for frames.
    Ignore,
}

/// Sensor pixel formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit monochrome.
    Mono8,

    /// 12-bit packed monochrome, delivered unpacked as 16-bit little endian.
    Mono12p,

    /// 8-bit Bayer RG mosaic.
    BayerRg8,

    /// 24-bit RGB.
    Rgb8,
}

impl PixelFormat {
    /// Bytes per pixel in a host frame buffer.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Mono8 | Self::BayerRg8 => 1,
            Self::Mono12p => 2,
            Self::Rgb8 => 3,
        }
    }

    /// Size of one frame buffer.
    pub fn frame_size(self, width: u32, height: u32) -> usize {
        width as usize * height as usize * self.bytes_per_pixel()
    }

    /// Device-side name of the format.
    pub fn name(self) -> &'static str {
        match self {
            Self::Mono8 => "Mono8",
            Self::Mono12p => "Mono12p",
            Self::BayerRg8 => "BayerRG8",
            Self::Rgb8 => "RGB8",
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error for pixel format names that are not recognised.
#[derive(Debug, Error)]
#[error("Unknown pixel format: {0}")]
pub struct UnknownPixelFormat(pub String);

impl FromStr for PixelFormat {
    type Err = UnknownPixelFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mono8" => Ok(Self::Mono8),
            "mono12p" => Ok(Self::Mono12p),
            "bayerrg8" => Ok(Self::BayerRg8),
            "rgb8" => Ok(Self::Rgb8),
            _ => Err(UnknownPixelFormat(s.to_string())),
        }
    }
}

/// A camera captured at session start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraInfo {
    /// Serial number; stable for the whole session.
    pub serial: String,

    /// Device model name.
    pub model: String,
}

/// Statistics for one closed segment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SegmentStats {
    /// Zero-based segment index.
    pub index: u32,

    /// Local ISO-8601 time the capture threads were launched.
    pub started_at: String,

    /// Recording time of the segment in seconds.
    pub duration_secs: f64,

    /// Frames written per serial.
    pub frame_counts: BTreeMap<String, u64>,

    /// Video files written in this segment.
    pub files: Vec<PathBuf>,
}

impl SegmentStats {
    /// Mean per-camera frame rate over the segment.
    pub fn average_fps(&self) -> f64 {
        mean_rate(&self.frame_counts, self.duration_secs)
    }
}

/// Aggregate statistics for a finished session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Session file-name prefix.
    pub prefix: String,

    /// Segments recorded.
    pub segments: u32,

    /// Frames written per serial across all segments.
    pub frame_counts: BTreeMap<String, u64>,

    /// Recording time summed over all segments, in seconds.
    pub total_secs: f64,

    /// Mean per-camera frame rate over the session.
    pub average_fps: f64,

    /// Why the session ended.
    pub stop_reason: StopReason,
}

impl SessionSummary {
    /// Build a summary, deriving the average frame rate.
    pub fn new(
        prefix: String,
        segments: u32,
        frame_counts: BTreeMap<String, u64>,
        total_secs: f64,
        stop_reason: StopReason,
    ) -> Self {
        let average_fps = mean_rate(&frame_counts, total_secs);
        Self {
            prefix,
            segments,
            frame_counts,
            total_secs,
            average_fps,
            stop_reason,
        }
    }
}

/// Mean frames per camera divided by elapsed seconds.
pub(crate) fn mean_rate(counts: &BTreeMap<String, u64>, secs: f64) -> f64 {
    if counts.is_empty() || secs <= 0.0 {
        return 0.0;
    }
    let total: u64 = counts.values().sum();
    total as f64 / counts.len() as f64 / secs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = SessionConfig::default();

        assert!(!config.is_synchronised());
        assert_eq!(config.retrieve_timeout(), Duration::from_millis(500));
        assert_eq!(config.tick_interval(), Duration::from_millis(750));
        assert_eq!(config.enumeration_timeout(), Duration::from_secs(5));
        assert_eq!(config.container, "avi");
    }

    #[test]
    fn test_synchronised_timeouts() {
        let config = SessionConfig {
            synchroniser: Some(SynchroniserConfig::default()),
            ..Default::default()
        };

        assert_eq!(config.retrieve_timeout(), Duration::from_secs(5));
        assert_eq!(config.tick_interval(), Duration::from_millis(1));
        assert_eq!(
            config.synchroniser.unwrap().handshake_timeout(),
            Duration::from_secs(3)
        );
    }

    #[test]
    fn test_pixel_format_parse() {
        assert_eq!("Mono8".parse::<PixelFormat>().unwrap(), PixelFormat::Mono8);
        assert_eq!("mono12p".parse::<PixelFormat>().unwrap(), PixelFormat::Mono12p);
        assert!("YUV422".parse::<PixelFormat>().is_err());
    }

    #[test]
    fn test_frame_size() {
        assert_eq!(PixelFormat::Mono8.frame_size(16, 8), 128);
        assert_eq!(PixelFormat::Mono12p.frame_size(16, 8), 256);
        assert_eq!(PixelFormat::Rgb8.frame_size(2, 2), 12);
    }

    #[test]
    fn test_mean_rate() {
        let mut counts = BTreeMap::new();
        counts.insert("a".to_string(), 90);
        counts.insert("b".to_string(), 60);

        assert!((mean_rate(&counts, 3.0) - 25.0).abs() < 1e-9);
        assert_eq!(mean_rate(&counts, 0.0), 0.0);
        assert_eq!(mean_rate(&BTreeMap::new(), 1.0), 0.0);
    }

    #[test]
    fn test_policy_serde_names() {
        let json = serde_json::to_string(&RetrievalTimeoutPolicy::RestartSegment).unwrap();
        assert_eq!(json, "\"restart_segment\"");
    }
}
