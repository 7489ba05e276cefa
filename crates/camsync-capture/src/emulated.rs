//! Emulated cameras producing numbered test images.
//!
//! Free-run cameras pace themselves at the requested frame rate. Triggered
//! cameras produce one frame per pulse on a shared [`TriggerLine`], the
//! software stand-in for a hardware trigger cable.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::{BufMut, BytesMut};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, instrument, trace};

use camsync_ipc::CameraInfo;

use crate::error::CaptureError;
use crate::frame::{CaptureTimestamp, Frame};
use crate::{CameraBackend, CameraDevice, CameraSettings, CaptureResult, TriggerMode};

/// Model name reported by emulated cameras.
pub const EMULATED_MODEL: &str = "Emulation";

/// Pulses a camera can have pending before further edges are missed.
const TRIGGER_QUEUE_DEPTH: usize = 2;

/// Fan-out of trigger pulses to every subscribed camera.
#[derive(Debug, Default)]
pub struct TriggerLine {
    subscribers: Mutex<Vec<Sender<u64>>>,
    pulses: AtomicU64,
}

impl TriggerLine {
    /// Create a line with no subscribers.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Connect a camera input to the line.
    pub fn subscribe(&self) -> Receiver<u64> {
        let (tx, rx) = crossbeam_channel::bounded(TRIGGER_QUEUE_DEPTH);
        self.subscribers.lock().push(tx);
        rx
    }

    /// Fire one edge. Returns how many inputs accepted it; inputs that are
    /// already saturated miss the edge, as a busy sensor would.
    pub fn pulse(&self) -> usize {
        let index = self.pulses.fetch_add(1, Ordering::SeqCst);
        let mut delivered = 0;
        self.subscribers.lock().retain(|tx| match tx.try_send(index) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        });
        delivered
    }

    /// Total edges fired so far.
    pub fn pulse_count(&self) -> u64 {
        self.pulses.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
struct CameraSpec {
    info: CameraInfo,
    stall_after: Option<u64>,
    reject_settings: bool,
    sequence: Arc<AtomicU64>,
}

/// Backend serving a fixed set of emulated cameras.
pub struct EmulatedBackend {
    cameras: Vec<CameraSpec>,
    trigger: Option<Arc<TriggerLine>>,
    open_devices: Arc<AtomicUsize>,
    opened_total: Arc<AtomicUsize>,
}

impl EmulatedBackend {
    /// Create `count` cameras with serials `0815-0000`, `0815-0001`, …
    pub fn new(count: usize) -> Self {
        let cameras = (0..count)
            .map(|i| CameraSpec {
                info: CameraInfo {
                    serial: format!("0815-{i:04}"),
                    model: EMULATED_MODEL.to_string(),
                },
                stall_after: None,
                reject_settings: false,
                sequence: Arc::new(AtomicU64::new(0)),
            })
            .collect();

        Self {
            cameras,
            trigger: None,
            open_devices: Arc::new(AtomicUsize::new(0)),
            opened_total: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wire every camera's trigger input to `line`.
    pub fn with_trigger_line(mut self, line: Arc<TriggerLine>) -> Self {
        self.trigger = Some(line);
        self
    }

    /// Make `serial` stop producing frames after `frames` frames per open.
    pub fn stall_after(mut self, serial: &str, frames: u64) -> Self {
        if let Some(spec) = self.cameras.iter_mut().find(|c| c.info.serial == serial) {
            spec.stall_after = Some(frames);
        }
        self
    }

    /// Make opening `serial` fail with a settings error.
    pub fn reject_settings(mut self, serial: &str) -> Self {
        if let Some(spec) = self.cameras.iter_mut().find(|c| c.info.serial == serial) {
            spec.reject_settings = true;
        }
        self
    }

    /// Devices opened and not yet closed.
    pub fn open_devices(&self) -> usize {
        self.open_devices.load(Ordering::SeqCst)
    }

    /// Devices opened since creation.
    pub fn opened_total(&self) -> usize {
        self.opened_total.load(Ordering::SeqCst)
    }
}

impl CameraBackend for EmulatedBackend {
    fn enumerate(&self) -> CaptureResult<Vec<CameraInfo>> {
        Ok(self.cameras.iter().map(|c| c.info.clone()).collect())
    }

    #[instrument(name = "emulated_open", skip_all, fields(serial = %camera.serial))]
    fn open(
        &self,
        camera: &CameraInfo,
        settings: &CameraSettings,
    ) -> CaptureResult<Box<dyn CameraDevice>> {
        let spec = self
            .cameras
            .iter()
            .find(|c| c.info.serial == camera.serial)
            .ok_or_else(|| CaptureError::DeviceNotFound(camera.serial.clone()))?;

        if spec.reject_settings {
            return Err(CaptureError::Settings {
                serial: camera.serial.clone(),
                message: "PixelFormat is not writable".to_string(),
            });
        }
        if settings.frame_rate <= 0.0 && !settings.is_triggered() {
            return Err(CaptureError::Settings {
                serial: camera.serial.clone(),
                message: format!("AcquisitionFrameRate {} out of range", settings.frame_rate),
            });
        }

        let trigger = match (&settings.trigger, &self.trigger) {
            (TriggerMode::FreeRun, _) => None,
            (TriggerMode::Hardware { .. }, Some(line)) => Some(line.subscribe()),
            (TriggerMode::Hardware { source, .. }, None) => {
                return Err(CaptureError::Settings {
                    serial: camera.serial.clone(),
                    message: format!("TriggerSource {source} is not connected"),
                });
            }
        };

        self.open_devices.fetch_add(1, Ordering::SeqCst);
        self.opened_total.fetch_add(1, Ordering::SeqCst);
        debug!("Emulated camera opened");

        Ok(Box::new(EmulatedCamera {
            info: spec.info.clone(),
            settings: settings.clone(),
            trigger,
            grabbing: false,
            closed: false,
            started: Instant::now(),
            next_deadline: Instant::now(),
            frames_this_open: 0,
            stall_after: spec.stall_after,
            sequence: Arc::clone(&spec.sequence),
            open_devices: Arc::clone(&self.open_devices),
        }))
    }
}

struct EmulatedCamera {
    info: CameraInfo,
    settings: CameraSettings,
    trigger: Option<Receiver<u64>>,
    grabbing: bool,
    closed: bool,
    started: Instant,
    next_deadline: Instant,
    frames_this_open: u64,
    stall_after: Option<u64>,
    sequence: Arc<AtomicU64>,
    open_devices: Arc<AtomicUsize>,
}

impl EmulatedCamera {
    fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.settings.frame_rate.max(0.001))
    }

    fn timeout_error(&self, timeout: Duration) -> CaptureError {
        CaptureError::RetrievalTimeout {
            serial: self.info.serial.clone(),
            timeout,
        }
    }

    fn is_stalled(&self) -> bool {
        self.stall_after
            .is_some_and(|limit| self.frames_this_open >= limit)
    }

    /// Test image: a flat grey level with the sequence number in front.
    fn test_image(&mut self) -> Frame {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        self.frames_this_open += 1;

        let size = self
            .settings
            .pixel_format
            .frame_size(self.settings.width, self.settings.height);
        let mut data = BytesMut::with_capacity(size);
        let marker = sequence.to_le_bytes();
        let head = size.min(marker.len());
        data.put_slice(&marker[..head]);
        data.put_bytes((sequence % 251) as u8, size - head);

        trace!(sequence, "Emulated frame");

        Frame::new(
            data.freeze(),
            self.settings.width,
            self.settings.height,
            self.settings.pixel_format,
            CaptureTimestamp::now(self.started),
            sequence,
        )
    }
}

impl CameraDevice for EmulatedCamera {
    fn info(&self) -> &CameraInfo {
        &self.info
    }

    fn start_grabbing(&mut self) -> CaptureResult<()> {
        if let Some(ref rx) = self.trigger {
            // Edges fired before arming are not seen by a real sensor either.
            while rx.try_recv().is_ok() {}
        }
        self.grabbing = true;
        self.started = Instant::now();
        self.next_deadline = self.started + self.frame_interval();
        Ok(())
    }

    fn is_waiting_for_trigger(&self) -> CaptureResult<bool> {
        Ok(self.grabbing && self.trigger.is_some())
    }

    fn retrieve(&mut self, timeout: Duration) -> CaptureResult<Frame> {
        if !self.grabbing {
            return Err(CaptureError::NotGrabbing(self.info.serial.clone()));
        }

        if self.is_stalled() {
            thread::sleep(timeout);
            return Err(self.timeout_error(timeout));
        }

        if let Some(ref rx) = self.trigger {
            return match rx.recv_timeout(timeout) {
                Ok(_) => Ok(self.test_image()),
                Err(RecvTimeoutError::Timeout) => Err(self.timeout_error(timeout)),
                Err(RecvTimeoutError::Disconnected) => {
                    Err(CaptureError::DeviceLost(self.info.serial.clone()))
                }
            };
        }

        let now = Instant::now();
        if self.next_deadline > now {
            let wait = self.next_deadline - now;
            if wait > timeout {
                thread::sleep(timeout);
                return Err(self.timeout_error(timeout));
            }
            thread::sleep(wait);
            self.next_deadline += self.frame_interval();
        } else {
            // Fell behind; resume pacing from now instead of bursting.
            self.next_deadline = now + self.frame_interval();
        }

        Ok(self.test_image())
    }

    fn stop_grabbing(&mut self) -> CaptureResult<()> {
        self.grabbing = false;
        Ok(())
    }

    fn resulting_frame_rate(&self) -> f64 {
        if self.settings.is_triggered() {
            0.0
        } else {
            self.settings.frame_rate
        }
    }

    fn settings_report(&self) -> String {
        let s = &self.settings;
        let mut report = String::new();
        report.push_str(&format!("Size Width: {}\n", s.width));
        report.push_str(&format!("Size Height: {}\n", s.height));
        report.push_str(&format!("Offset X: {}\n", s.offset_x));
        report.push_str(&format!("Offset Y: {}\n", s.offset_y));
        report.push_str(&format!("Pixel Format: {}\n", s.pixel_format));
        report.push_str("Exposure Auto: Off\n");
        report.push_str(&format!("Exposure Time: {}\n", s.exposure_us));
        match &s.trigger {
            TriggerMode::FreeRun => {
                report.push_str("Trigger Mode: Off\n");
                report.push_str("Acquisition Frame Rate Enable: true\n");
                report.push_str(&format!("Acquisition Frame Rate: {}\n", s.frame_rate));
                report.push_str(&format!(
                    "->Resulting Frame Rate: {}\n",
                    self.resulting_frame_rate()
                ));
            }
            TriggerMode::Hardware { source, activation } => {
                report.push_str("Trigger Mode: On\n");
                report.push_str(&format!("Trigger Source: {source}\n"));
                report.push_str(&format!("Trigger Activation: {activation:?}\n"));
                report.push_str("Acquisition Frame Rate Enable: false\n");
            }
        }
        report
    }

    fn close(&mut self) -> CaptureResult<()> {
        if !self.closed {
            self.closed = true;
            self.grabbing = false;
            self.open_devices.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for EmulatedCamera {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
