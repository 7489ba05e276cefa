//! One camera's capture thread.
//!
//! A channel owns a device and its sink for one segment. Its thread
//! retrieves frames, offers each to the preview slot, appends it to the
//! sink, and counts it. The supervisor only touches the shared counter,
//! readiness flag, slot and exit status until the thread is joined.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, instrument, warn};

use camsync_capture::{CameraDevice, FrameSlot, StopToken};
use camsync_encoder::FrameSink;
use camsync_ipc::{CameraInfo, RetrievalTimeoutPolicy};

use crate::RecorderResult;

/// How often an unarmed camera is asked whether it waits for trigger.
const ARM_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// How a capture thread ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelExit {
    /// Stop token cancelled.
    Cancelled,

    /// A frame wait exceeded its timeout.
    TimedOut { timeout: Duration },

    /// Device or sink error.
    Failed { message: String },
}

/// Capture parameters shared by every channel of a segment.
#[derive(Debug, Clone, Copy)]
pub struct ChannelParams {
    /// Wait for the device to arm before counting as ready.
    pub triggered: bool,

    /// Per-frame retrieval timeout.
    pub timeout: Duration,

    /// Reaction to a retrieval timeout.
    pub policy: RetrievalTimeoutPolicy,
}

/// Device and sink handed back by a joined capture thread.
pub struct ChannelParts {
    pub device: Box<dyn CameraDevice>,
    pub sink: Box<dyn FrameSink>,
}

#[derive(Default)]
struct Shared {
    counter: AtomicU64,
    ready: AtomicBool,
    slot: FrameSlot,
    exit: Mutex<Option<ChannelExit>>,
}

/// A camera with its sink, opened but not yet capturing.
pub struct CaptureChannel {
    info: CameraInfo,
    device: Box<dyn CameraDevice>,
    sink: Box<dyn FrameSink>,
}

impl CaptureChannel {
    /// Pair an open device with its sink.
    pub fn new(device: Box<dyn CameraDevice>, sink: Box<dyn FrameSink>) -> Self {
        Self {
            info: device.info().clone(),
            device,
            sink,
        }
    }

    /// Camera identity.
    pub fn info(&self) -> &CameraInfo {
        &self.info
    }

    /// Undo an open: remove the partial file and close the device.
    pub fn abort(mut self) {
        self.sink.abort();
        if let Err(e) = self.device.close() {
            warn!(serial = %self.info.serial, "Device close failed: {}", e);
        }
    }

    /// Start the capture thread.
    #[instrument(name = "channel_launch", skip_all, fields(serial = %self.info.serial))]
    pub fn launch(self, token: &StopToken, params: ChannelParams) -> RecorderResult<RunningChannel> {
        let shared = Arc::new(Shared::default());
        let serial = self.info.serial.clone();
        let thread_shared = Arc::clone(&shared);
        let thread_token = token.clone();
        let Self { device, sink, .. } = self;

        let handle = thread::Builder::new()
            .name(format!("capture-{serial}"))
            .spawn(move || capture_loop(device, sink, thread_shared, thread_token, params))?;

        debug!("Capture thread started");
        Ok(RunningChannel {
            serial,
            shared,
            handle,
        })
    }
}

/// A channel whose thread is running.
pub struct RunningChannel {
    serial: String,
    shared: Arc<Shared>,
    handle: JoinHandle<ChannelParts>,
}

impl RunningChannel {
    /// Camera serial.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// True once the device is waiting for trigger, or immediately in
    /// free-run mode.
    pub fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::Acquire)
    }

    /// Latest unread frame, if one arrived since the last call.
    pub fn slot(&self) -> &FrameSlot {
        &self.shared.slot
    }

    /// Why the thread ended, `None` while it is still capturing.
    pub fn exit(&self) -> Option<ChannelExit> {
        self.shared.exit.lock().clone()
    }

    /// Wait for the thread and take back its device and sink, together
    /// with the final frame count. A panicked thread leaves no parts.
    pub fn join(self) -> (u64, Option<ChannelParts>) {
        let parts = match self.handle.join() {
            Ok(parts) => Some(parts),
            Err(_) => {
                error!(serial = %self.serial, "Capture thread panicked");
                None
            }
        };
        self.shared.slot.clear();
        (self.shared.counter.load(Ordering::Acquire), parts)
    }
}

/// Records a failure exit if the capture thread unwinds.
struct PanicGuard<'a>(&'a Shared);

impl Drop for PanicGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            *self.0.exit.lock() = Some(ChannelExit::Failed {
                message: "capture thread panicked".to_string(),
            });
        }
    }
}

fn capture_loop(
    mut device: Box<dyn CameraDevice>,
    mut sink: Box<dyn FrameSink>,
    shared: Arc<Shared>,
    token: StopToken,
    params: ChannelParams,
) -> ChannelParts {
    let _guard = PanicGuard(&shared);
    let serial = device.info().serial.clone();
    let exit = run_capture(&serial, device.as_mut(), sink.as_mut(), &shared, &token, params);

    if let Err(e) = device.stop_grabbing() {
        warn!(%serial, "Stop grabbing failed: {}", e);
    }
    match &exit {
        ChannelExit::Cancelled => debug!(%serial, frames = shared.counter.load(Ordering::Relaxed), "Capture stopped"),
        ChannelExit::TimedOut { timeout } => error!(%serial, ?timeout, "Frame retrieval timed out"),
        ChannelExit::Failed { message } => error!(%serial, "Capture failed: {}", message),
    }
    *shared.exit.lock() = Some(exit);

    ChannelParts { device, sink }
}

fn run_capture(
    serial: &str,
    device: &mut dyn CameraDevice,
    sink: &mut dyn FrameSink,
    shared: &Shared,
    token: &StopToken,
    params: ChannelParams,
) -> ChannelExit {
    if let Err(e) = device.start_grabbing() {
        return ChannelExit::Failed {
            message: e.to_string(),
        };
    }

    if params.triggered {
        loop {
            if token.is_cancelled() {
                return ChannelExit::Cancelled;
            }
            match device.is_waiting_for_trigger() {
                Ok(true) => break,
                Ok(false) => {
                    token.wait_timeout(ARM_POLL_INTERVAL);
                }
                Err(e) => {
                    return ChannelExit::Failed {
                        message: e.to_string(),
                    }
                }
            }
        }
        info!(serial, "Camera waiting for trigger");
    }
    shared.ready.store(true, Ordering::Release);

    loop {
        if token.is_cancelled() {
            return ChannelExit::Cancelled;
        }

        match device.retrieve(params.timeout) {
            Ok(frame) => {
                shared.slot.put(frame.clone());
                if let Err(e) = sink.write(&frame) {
                    return ChannelExit::Failed {
                        message: format!("write to {} failed: {}", sink.path().display(), e),
                    };
                }
                shared.counter.fetch_add(1, Ordering::Release);
            }
            Err(e) if e.is_timeout() => {
                // Waits cut short by a stop request are not failures.
                if token.is_cancelled() {
                    return ChannelExit::Cancelled;
                }
                if params.policy == RetrievalTimeoutPolicy::Ignore {
                    warn!(serial, timeout = ?params.timeout, "No frame, still waiting");
                    continue;
                }
                return ChannelExit::TimedOut {
                    timeout: params.timeout,
                };
            }
            Err(e) => {
                return ChannelExit::Failed {
                    message: e.to_string(),
                }
            }
        }
    }
}
