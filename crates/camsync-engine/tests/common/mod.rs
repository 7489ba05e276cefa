#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use camsync_capture::{read_sequence_marker, EmulatedBackend, Frame, StopToken, TriggerLine};
use camsync_encoder::{EncoderError, EncoderResult, FrameSink, SinkFactory, SinkSpec};
use camsync_engine::Backends;
use camsync_ipc::{SessionConfig, SynchroniserConfig};
use camsync_trigger::EmulatedSynchroniserFactory;

/// What the recording sinks saw.
#[derive(Debug, Default)]
pub struct Journal {
    pub specs: Vec<SinkSpec>,
    pub frames: HashMap<PathBuf, Vec<u64>>,
    pub closed: Vec<PathBuf>,
    pub aborted: Vec<PathBuf>,
}

/// Sink factory keeping frame sequence numbers in memory.
#[derive(Clone, Default)]
pub struct RecordingSinkFactory {
    journal: Arc<Mutex<Journal>>,
    fail_for: Option<String>,
    panic_for: Option<(String, usize)>,
}

impl RecordingSinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opening a file for `serial` fails.
    pub fn failing_for(serial: &str) -> Self {
        Self {
            fail_for: Some(serial.to_string()),
            ..Self::default()
        }
    }

    /// Writing `serial`'s frame number `after` panics.
    pub fn panicking_for(serial: &str, after: usize) -> Self {
        Self {
            panic_for: Some((serial.to_string(), after)),
            ..Self::default()
        }
    }

    pub fn journal(&self) -> parking_lot::MutexGuard<'_, Journal> {
        self.journal.lock()
    }

    /// Sequence numbers written for `serial`, in segment order.
    pub fn sequences_for(&self, serial: &str) -> Vec<u64> {
        let journal = self.journal.lock();
        journal
            .specs
            .iter()
            .filter(|spec| file_name(&spec.path).contains(serial))
            .flat_map(|spec| journal.frames.get(&spec.path).cloned().unwrap_or_default())
            .collect()
    }
}

impl SinkFactory for RecordingSinkFactory {
    fn open(&self, spec: &SinkSpec) -> EncoderResult<Box<dyn FrameSink>> {
        if let Some(serial) = &self.fail_for {
            if file_name(&spec.path).contains(serial.as_str()) {
                return Err(EncoderError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "read-only output directory",
                )));
            }
        }

        let mut journal = self.journal.lock();
        journal.specs.push(spec.clone());
        journal.frames.insert(spec.path.clone(), Vec::new());

        let panic_after = self
            .panic_for
            .as_ref()
            .filter(|(serial, _)| file_name(&spec.path).contains(serial.as_str()))
            .map(|(_, after)| *after as u64);

        Ok(Box::new(RecordingSink {
            path: spec.path.clone(),
            journal: Arc::clone(&self.journal),
            frames: 0,
            finished: false,
            panic_after,
        }))
    }
}

struct RecordingSink {
    path: PathBuf,
    journal: Arc<Mutex<Journal>>,
    frames: u64,
    finished: bool,
    panic_after: Option<u64>,
}

impl FrameSink for RecordingSink {
    fn write(&mut self, frame: &Frame) -> EncoderResult<()> {
        if self.panic_after == Some(self.frames) {
            panic!("sink for {} gave up", self.path.display());
        }
        let sequence = read_sequence_marker(&frame.data).unwrap_or(frame.sequence);
        self.journal
            .lock()
            .frames
            .entry(self.path.clone())
            .or_default()
            .push(sequence);
        self.frames += 1;
        Ok(())
    }

    fn close(&mut self) -> EncoderResult<()> {
        if !self.finished {
            self.finished = true;
            self.journal.lock().closed.push(self.path.clone());
        }
        Ok(())
    }

    fn abort(&mut self) {
        if !self.finished {
            self.finished = true;
            self.journal.lock().aborted.push(self.path.clone());
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn frames_written(&self) -> u64 {
        self.frames
    }
}

pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Small frames with short timeouts.
pub fn free_run_config(output_dir: &Path) -> SessionConfig {
    SessionConfig {
        output_dir: output_dir.to_path_buf(),
        file_prefix: Some("session".to_string()),
        width: 64,
        height: 48,
        frame_rate: 30.0,
        enumeration_timeout_ms: 300,
        free_run_retrieve_timeout_ms: 200,
        triggered_retrieve_timeout_ms: 500,
        preview_interval_ms: 20,
        arming_timeout_ms: 2_000,
        ..SessionConfig::default()
    }
}

pub fn synchronised_config(output_dir: &Path, frame_rate: f64) -> SessionConfig {
    SessionConfig {
        file_prefix: None,
        synchroniser: Some(SynchroniserConfig {
            frame_rate,
            handshake_timeout_ms: 1_000,
            ..SynchroniserConfig::default()
        }),
        ..free_run_config(output_dir)
    }
}

/// Emulated hardware around an in-memory sink.
pub struct Rig {
    pub cameras: Arc<EmulatedBackend>,
    pub sinks: RecordingSinkFactory,
    pub synchronisers: Arc<EmulatedSynchroniserFactory>,
    pub line: Arc<TriggerLine>,
}

impl Rig {
    pub fn new(cameras: EmulatedBackend) -> Self {
        Self::with_sinks(cameras, RecordingSinkFactory::new())
    }

    pub fn with_sinks(cameras: EmulatedBackend, sinks: RecordingSinkFactory) -> Self {
        let line = TriggerLine::new();
        Self::build(
            cameras,
            sinks,
            EmulatedSynchroniserFactory::new(Arc::clone(&line)),
            line,
        )
    }

    /// Triggered cameras wired to a synchroniser factory built by `make`.
    pub fn synchronised<F>(cameras: EmulatedBackend, make: F) -> Self
    where
        F: FnOnce(EmulatedSynchroniserFactory) -> EmulatedSynchroniserFactory,
    {
        let line = TriggerLine::new();
        let factory = make(EmulatedSynchroniserFactory::new(Arc::clone(&line)));
        Self::build(
            cameras.with_trigger_line(Arc::clone(&line)),
            RecordingSinkFactory::new(),
            factory,
            line,
        )
    }

    fn build(
        cameras: EmulatedBackend,
        sinks: RecordingSinkFactory,
        synchronisers: EmulatedSynchroniserFactory,
        line: Arc<TriggerLine>,
    ) -> Self {
        Self {
            cameras: Arc::new(cameras),
            sinks,
            synchronisers: Arc::new(synchronisers),
            line,
        }
    }

    pub fn backends(&self) -> Backends {
        Backends {
            cameras: self.cameras.clone(),
            sinks: Arc::new(self.sinks.clone()),
            synchronisers: self.synchronisers.clone(),
        }
    }
}

/// Cancel `token` after `delay`.
pub fn stop_after(token: StopToken, delay: Duration) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        thread::sleep(delay);
        token.cancel();
    })
}
