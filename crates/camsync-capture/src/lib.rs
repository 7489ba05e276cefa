//! Camera device abstraction for camsync.
//!
//! Vendor SDKs plug in by implementing [`CameraBackend`] and
//! [`CameraDevice`]. The crate also provides the single-slot preview
//! hand-off, the cancellation token shared by capture threads, and an
//! emulated backend with software-triggered test-image cameras.

mod emulated;
mod error;
mod frame;
mod slot;
mod stop;

pub use emulated::{EmulatedBackend, TriggerLine, EMULATED_MODEL};
pub use error::CaptureError;
pub use frame::{read_sequence_marker, CaptureTimestamp, Frame};
pub use slot::FrameSlot;
pub use stop::StopToken;

use std::time::Duration;

use camsync_ipc::{CameraInfo, PixelFormat, SessionConfig};

/// Result type for capture operations.
pub type CaptureResult<T> = Result<T, CaptureError>;

/// How frame acquisition is started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerMode {
    /// The camera paces itself at the configured frame rate.
    FreeRun,

    /// One frame per edge on an external trigger input.
    Hardware {
        /// Input line, e.g. `Line3`.
        source: String,

        /// Edge that starts a frame.
        activation: TriggerActivation,
    },
}

/// Trigger edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerActivation {
    RisingEdge,
    FallingEdge,
}

/// Settings applied to a camera when it is opened.
#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub offset_x: u32,
    pub offset_y: u32,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub exposure_us: u32,
    pub trigger: TriggerMode,
    /// Requested frame rate; only honoured in free-run mode.
    pub frame_rate: f64,
}

impl CameraSettings {
    /// Derive camera settings from a session configuration.
    pub fn from_session(config: &SessionConfig) -> Self {
        let trigger = if config.is_synchronised() {
            TriggerMode::Hardware {
                source: "Line3".to_string(),
                activation: TriggerActivation::RisingEdge,
            }
        } else {
            TriggerMode::FreeRun
        };

        Self {
            offset_x: config.offset_x,
            offset_y: config.offset_y,
            width: config.width,
            height: config.height,
            pixel_format: config.pixel_format,
            exposure_us: config.exposure_us,
            trigger,
            frame_rate: config.frame_rate,
        }
    }

    /// Returns true if frames are gated by an external trigger.
    pub fn is_triggered(&self) -> bool {
        matches!(self.trigger, TriggerMode::Hardware { .. })
    }
}

/// Enumerates and opens cameras.
pub trait CameraBackend: Send + Sync {
    /// List the cameras currently attached.
    fn enumerate(&self) -> CaptureResult<Vec<CameraInfo>>;

    /// Open a camera and apply `settings`.
    fn open(
        &self,
        camera: &CameraInfo,
        settings: &CameraSettings,
    ) -> CaptureResult<Box<dyn CameraDevice>>;
}

/// An opened camera.
pub trait CameraDevice: Send {
    /// Identity of this camera.
    fn info(&self) -> &CameraInfo;

    /// Begin acquisition.
    fn start_grabbing(&mut self) -> CaptureResult<()>;

    /// Whether the device is armed and waiting for a trigger edge.
    fn is_waiting_for_trigger(&self) -> CaptureResult<bool>;

    /// Wait up to `timeout` for the next frame.
    fn retrieve(&mut self, timeout: Duration) -> CaptureResult<Frame>;

    /// End acquisition.
    fn stop_grabbing(&mut self) -> CaptureResult<()>;

    /// Frame rate the device estimates it will reach.
    fn resulting_frame_rate(&self) -> f64;

    /// Human-readable dump of the applied settings.
    fn settings_report(&self) -> String;

    /// Release the device. Idempotent.
    fn close(&mut self) -> CaptureResult<()>;
}
