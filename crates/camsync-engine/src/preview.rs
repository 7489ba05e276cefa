//! Live preview of the most recent frame per camera.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::info;

use camsync_capture::Frame;

/// Where the supervisor shows preview frames.
pub trait PreviewSurface: Send {
    /// A segment with these cameras begins.
    fn open(&mut self, serials: &[String]);

    /// Latest frame of `serial`.
    fn show(&mut self, serial: &str, frame: &Frame);

    /// The segment ended.
    fn close(&mut self);
}

/// Discards every frame.
#[derive(Debug, Default)]
pub struct NullPreview;

impl PreviewSurface for NullPreview {
    fn open(&mut self, _serials: &[String]) {}

    fn show(&mut self, _serial: &str, _frame: &Frame) {}

    fn close(&mut self) {}
}

/// Logs the latest sequence number per camera, at most once per interval.
#[derive(Debug)]
pub struct TracingPreview {
    interval: Duration,
    last_report: HashMap<String, Instant>,
    reports: u64,
}

impl Default for TracingPreview {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl TracingPreview {
    /// Preview reporting every `interval` per camera.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_report: HashMap::new(),
            reports: 0,
        }
    }

    /// Lines logged so far.
    pub fn reports(&self) -> u64 {
        self.reports
    }
}

impl PreviewSurface for TracingPreview {
    fn open(&mut self, serials: &[String]) {
        self.last_report.clear();
        info!(cameras = serials.len(), "Preview opened");
    }

    fn show(&mut self, serial: &str, frame: &Frame) {
        let now = Instant::now();
        if let Some(last) = self.last_report.get(serial) {
            if now.duration_since(*last) < self.interval {
                return;
            }
        }
        self.last_report.insert(serial.to_string(), now);
        self.reports += 1;
        info!(
            serial,
            sequence = frame.sequence,
            pts_ms = frame.timestamp.pts_ms(),
            "Preview"
        );
    }

    fn close(&mut self) {
        self.last_report.clear();
    }
}
