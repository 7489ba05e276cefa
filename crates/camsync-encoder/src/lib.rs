//! Per-camera video sinks.
//!
//! A sink receives frames in arrival order and persists them. The
//! production sink pipes raw frames into an ffmpeg process that writes the
//! container file.

mod error;
mod ffmpeg;

pub use error::EncoderError;
pub use ffmpeg::{build_ffmpeg_command, FfmpegConfig, FfmpegSink, FfmpegSinkFactory};

use std::path::{Path, PathBuf};

use camsync_capture::Frame;
use camsync_ipc::PixelFormat;

/// Result type for encoder operations.
pub type EncoderResult<T> = Result<T, EncoderError>;

/// Everything needed to open one sink.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkSpec {
    /// Output file.
    pub path: PathBuf,

    /// Width in pixels.
    pub width: u32,

    /// Height in pixels.
    pub height: u32,

    /// Frame rate stored in the container.
    pub frame_rate: f64,

    /// Layout of incoming frames.
    pub pixel_format: PixelFormat,
}

impl SinkSpec {
    /// Bytes per incoming frame.
    pub fn frame_size(&self) -> usize {
        self.pixel_format.frame_size(self.width, self.height)
    }
}

/// Ordered frame consumer for one camera and one segment.
pub trait FrameSink: Send {
    /// Append a frame. May block while the encoder catches up.
    fn write(&mut self, frame: &Frame) -> EncoderResult<()>;

    /// Flush and release the encoder. Idempotent.
    fn close(&mut self) -> EncoderResult<()>;

    /// Drop the recording: stop the encoder and remove the partial file.
    fn abort(&mut self);

    /// Output file.
    fn path(&self) -> &Path;

    /// Frames accepted so far.
    fn frames_written(&self) -> u64;
}

/// Opens sinks.
pub trait SinkFactory: Send + Sync {
    /// Open a sink for `spec`.
    fn open(&self, spec: &SinkSpec) -> EncoderResult<Box<dyn FrameSink>>;
}

/// Raw-video pixel format tag understood by the encoder.
///
/// `gray` for 8-bit, `gray12le` for 12-bit; anything else is unsupported.
pub fn pixel_format_tag(format: PixelFormat) -> EncoderResult<&'static str> {
    match format {
        PixelFormat::Mono8 => Ok("gray"),
        PixelFormat::Mono12p => Ok("gray12le"),
        other => Err(EncoderError::UnsupportedPixelFormat(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_tags() {
        assert_eq!(pixel_format_tag(PixelFormat::Mono8).unwrap(), "gray");
        assert_eq!(pixel_format_tag(PixelFormat::Mono12p).unwrap(), "gray12le");
        assert!(matches!(
            pixel_format_tag(PixelFormat::Rgb8),
            Err(EncoderError::UnsupportedPixelFormat(PixelFormat::Rgb8))
        ));
        assert!(pixel_format_tag(PixelFormat::BayerRg8).is_err());
    }

    #[test]
    fn test_spec_frame_size() {
        let spec = SinkSpec {
            path: PathBuf::from("a.avi"),
            width: 10,
            height: 10,
            frame_rate: 30.0,
            pixel_format: PixelFormat::Mono12p,
        };
        assert_eq!(spec.frame_size(), 200);
    }
}
