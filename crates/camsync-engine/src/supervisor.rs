//! Session state machine.
//!
//! One supervisor drives one session on the calling thread: it finds the
//! cameras, opens a segment's devices and sinks, launches the capture
//! threads, arms the synchroniser once, then watches the segment until a
//! rollover, a stop request or a fault. Every exit path goes through
//! [`SessionSupervisor::shutdown`] so threads are joined and files closed.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use parking_lot::RwLock;
use tracing::{debug, error, info, instrument, warn};

use camsync_capture::{CameraBackend, CameraSettings, StopToken};
use camsync_encoder::{SinkFactory, SinkSpec};
use camsync_ipc::{
    CameraInfo, RecorderEvent, RetrievalTimeoutPolicy, SegmentStats, SessionConfig, SessionState,
    SessionSummary, StopReason, SynchroniserConfig,
};
use camsync_trigger::{
    expect_marker, SyncMessage, Synchroniser, SynchroniserFactory, START_MARKER,
    STOP_PERMANENT_MARKER, STOP_ROLLOVER_MARKER,
};

use crate::channel::{CaptureChannel, ChannelExit, ChannelParams, ChannelParts, RunningChannel};
use crate::error::RecorderError;
use crate::logger::{local_iso_now, SessionLogger};
use crate::naming::{timestamp_now, SessionPaths};
use crate::preview::{NullPreview, PreviewSurface};
use crate::stats::{recorded_line, SessionTally};
use crate::RecorderResult;

/// Pause between enumeration attempts.
const ENUMERATION_RETRY: Duration = Duration::from_millis(100);

/// Pause between readiness checks while arming.
const ARM_POLL: Duration = Duration::from_millis(1);

/// Device collaborators of a session.
#[derive(Clone)]
pub struct Backends {
    /// Camera enumeration and opening.
    pub cameras: Arc<dyn CameraBackend>,

    /// Video file writers.
    pub sinks: Arc<dyn SinkFactory>,

    /// Trigger device connection.
    pub synchronisers: Arc<dyn SynchroniserFactory>,
}

struct Segment {
    index: u32,
    token: StopToken,
    channels: Vec<RunningChannel>,
    files: Vec<PathBuf>,
    started: Instant,
    started_at: String,
}

struct HaltedSegment {
    index: u32,
    files: Vec<PathBuf>,
    started_at: String,
    duration: Duration,
    channels: Vec<(String, u64, Option<ChannelParts>)>,
}

struct Session {
    paths: SessionPaths,
    logger: SessionLogger,
    cameras: Vec<CameraInfo>,
    tally: SessionTally,
    next_segment: u32,
    segment: Option<Segment>,
    sync: Option<Box<dyn Synchroniser>>,
    sync_started: bool,
    sync_confirmed: bool,
}

impl Session {
    fn note(&mut self, message: &str, echo: bool) {
        if let Err(e) = self.logger.log(message, echo) {
            warn!("Session log write failed: {}", e);
        }
    }

    fn note_with_time(&mut self, message: &str, echo: bool) -> String {
        match self.logger.log_with_time(message, echo) {
            Ok(stamp) => stamp,
            Err(e) => {
                warn!("Session log write failed: {}", e);
                local_iso_now()
            }
        }
    }
}

enum SegmentEnd {
    Rollover,
    Restart { serial: String },
    Stop,
}

/// Runs one recording session.
pub struct SessionSupervisor {
    config: SessionConfig,
    backends: Backends,
    preview: Box<dyn PreviewSurface>,
    events: Option<Sender<RecorderEvent>>,
    state: Arc<RwLock<SessionState>>,
    stop: StopToken,
}

impl SessionSupervisor {
    /// Supervisor for a session described by `config`.
    pub fn new(config: SessionConfig, backends: Backends) -> Self {
        Self {
            config,
            backends,
            preview: Box::new(NullPreview),
            events: None,
            state: Arc::new(RwLock::new(SessionState::Idle)),
            stop: StopToken::new(),
        }
    }

    /// Show live frames on `preview`.
    pub fn with_preview(mut self, preview: Box<dyn PreviewSurface>) -> Self {
        self.preview = preview;
        self
    }

    /// Report progress on `events`.
    pub fn with_events(mut self, events: Sender<RecorderEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Publish state transitions into `state`.
    pub fn with_state(mut self, state: Arc<RwLock<SessionState>>) -> Self {
        self.state = state;
        self
    }

    /// Stop the session when `token` is cancelled.
    pub fn with_stop_token(mut self, token: StopToken) -> Self {
        self.stop = token;
        self
    }

    /// Token that requests a stop.
    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state.read().clone()
    }

    /// Record until stopped. Blocks the calling thread.
    ///
    /// Returns the session summary, or the error that ended the session.
    /// Resources are released in both cases.
    #[instrument(name = "session_run", skip(self))]
    pub fn run(mut self) -> RecorderResult<SessionSummary> {
        self.transition(SessionState::Enumerating);

        let cameras = match self.enumerate() {
            Ok(cameras) => cameras,
            Err(e) => return Err(self.abandon(e)),
        };
        self.send_event(RecorderEvent::CamerasFound(cameras.clone()));

        let prefix = self.config.file_prefix.clone().unwrap_or_else(timestamp_now);
        let paths = SessionPaths::new(&self.config, prefix);
        let logger = match SessionLogger::create(paths.log_file(), paths.prefix()) {
            Ok(logger) => logger,
            Err(e) => return Err(self.abandon(e.into())),
        };
        info!(log = %logger.path().display(), "Session started");

        let mut session = Session {
            paths,
            logger,
            cameras,
            tally: SessionTally::new(),
            next_segment: 0,
            segment: None,
            sync: None,
            sync_started: false,
            sync_confirmed: false,
        };

        let result = self.record(&mut session);
        let reason = match &result {
            Ok(()) => StopReason::OperatorRequested,
            Err(e) => {
                error!("Recording failed: {}", e);
                session.note_with_time(&format!("Error: {e}"), true);
                self.send_event(RecorderEvent::Error {
                    fatal: true,
                    message: e.to_string(),
                });
                e.stop_reason()
            }
        };

        self.transition(SessionState::Stopping {
            reason: reason.clone(),
        });
        let summary = self.shutdown(&mut session, reason);
        self.transition(SessionState::Stopped);
        self.send_event(RecorderEvent::SessionFinished(summary.clone()));

        result.map(|()| summary)
    }

    /// End a session that never opened a segment.
    fn abandon(&self, err: RecorderError) -> RecorderError {
        error!("{}", err);
        self.send_event(RecorderEvent::Error {
            fatal: true,
            message: err.to_string(),
        });
        let reason = err.stop_reason();
        self.transition(SessionState::Stopping {
            reason: reason.clone(),
        });
        self.transition(SessionState::Stopped);

        let prefix = self.config.file_prefix.clone().unwrap_or_default();
        let summary = SessionTally::new().summary(&prefix, reason);
        self.send_event(RecorderEvent::SessionFinished(summary));
        err
    }

    #[instrument(name = "enumerate_cameras", skip(self))]
    fn enumerate(&self) -> RecorderResult<Vec<CameraInfo>> {
        let timeout = self.config.enumeration_timeout();
        let started = Instant::now();

        loop {
            match self.backends.cameras.enumerate() {
                Ok(mut cameras) if !cameras.is_empty() => {
                    cameras.truncate(self.config.max_cameras);
                    info!(count = cameras.len(), "Cameras found");
                    return Ok(cameras);
                }
                Ok(_) => debug!("No cameras yet"),
                Err(e) => warn!("Enumeration failed: {}", e),
            }

            if started.elapsed() >= timeout || self.stop.is_cancelled() {
                return Err(RecorderError::DeviceNotFound);
            }
            self.stop.wait_timeout(ENUMERATION_RETRY);
        }
    }

    fn record(&mut self, session: &mut Session) -> RecorderResult<()> {
        if let Some(sync_config) = &self.config.synchroniser {
            let sync = self
                .backends
                .synchronisers
                .connect(sync_config)
                .map_err(|source| RecorderError::SynchroniserNotFound { source })?;
            info!("Synchroniser connected");
            session.sync = Some(sync);
        }

        loop {
            if self.stop.is_cancelled() {
                return Ok(());
            }

            let index = self.start_segment(session)?;

            if session.sync.is_some() && !session.sync_confirmed && !self.arm(session, index)? {
                return Ok(());
            }

            self.transition(SessionState::Running { segment: index });

            match self.watch(session)? {
                SegmentEnd::Stop => return Ok(()),
                SegmentEnd::Rollover => {
                    self.transition(SessionState::RollingOver { segment: index });
                    session.note_with_time("Recording rollover...", true);
                }
                SegmentEnd::Restart { serial } => {
                    self.transition(SessionState::RollingOver { segment: index });
                    let message = format!("Camera {serial} stopped delivering frames, restarting segment...");
                    session.note_with_time(&message, true);
                    self.send_event(RecorderEvent::Error {
                        fatal: false,
                        message,
                    });
                }
            }

            if let Some(segment) = session.segment.take() {
                let halted = self.halt(segment);
                self.close_segment(session, halted, true);
            }
        }
    }

    /// Open every camera and sink for the next segment and launch the
    /// capture threads. Nothing stays open if any camera fails.
    #[instrument(name = "start_segment", skip_all)]
    fn start_segment(&mut self, session: &mut Session) -> RecorderResult<u32> {
        let index = session.next_segment;
        session.next_segment += 1;
        self.transition(SessionState::StartingSegment { segment: index });

        let stamp = if self.config.is_synchronised() {
            timestamp_now()
        } else {
            session.paths.prefix().to_string()
        };
        let cameras = session.cameras.clone();
        let serials: Vec<String> = cameras.iter().map(|c| c.serial.clone()).collect();
        let files = session.paths.reserve(&stamp, index, &serials);
        let settings = CameraSettings::from_session(&self.config);

        let mut opened = Vec::with_capacity(cameras.len());
        for (camera, path) in cameras.iter().zip(&files) {
            match self.open_channel(session, camera, &settings, path.clone()) {
                Ok(channel) => opened.push(channel),
                Err(e) => {
                    warn!(opened = opened.len(), "Segment start failed, closing opened cameras");
                    opened.into_iter().for_each(CaptureChannel::abort);
                    return Err(e);
                }
            }
        }

        let params = ChannelParams {
            triggered: self.config.is_synchronised(),
            timeout: self.config.retrieve_timeout(),
            policy: self.config.retrieval_timeout_policy,
        };
        let token = StopToken::new();
        let mut channels = Vec::with_capacity(opened.len());
        let mut pending = opened.into_iter();
        while let Some(channel) = pending.next() {
            match channel.launch(&token, params) {
                Ok(running) => channels.push(running),
                Err(e) => {
                    token.cancel();
                    pending.by_ref().for_each(CaptureChannel::abort);
                    for running in channels {
                        if let (_, Some(mut parts)) = running.join() {
                            parts.sink.abort();
                            let _ = parts.device.close();
                        }
                    }
                    return Err(e);
                }
            }
        }

        self.preview.open(&serials);
        let count = channels.len();
        let started_at = session.note_with_time(
            &format!(
                "Started recording with {} camera{}.",
                count,
                if count == 1 { "" } else { "s" }
            ),
            true,
        );

        session.segment = Some(Segment {
            index,
            token,
            channels,
            files,
            started: Instant::now(),
            started_at,
        });
        Ok(index)
    }

    #[instrument(name = "open_channel", skip_all, fields(serial = %camera.serial))]
    fn open_channel(
        &self,
        session: &mut Session,
        camera: &CameraInfo,
        settings: &CameraSettings,
        path: PathBuf,
    ) -> RecorderResult<CaptureChannel> {
        let mut device = self
            .backends
            .cameras
            .open(camera, settings)
            .map_err(|source| RecorderError::DeviceSettings {
                serial: camera.serial.clone(),
                source,
            })?;

        session.note(&format!("Found camera {} ({}).", camera.serial, camera.model), true);
        session.note("Settings:", false);
        session.note(&device.settings_report(), false);

        let frame_rate = match &self.config.synchroniser {
            Some(sync) => sync.frame_rate,
            None => match device.resulting_frame_rate() {
                rate if rate > 0.0 => rate,
                _ => self.config.frame_rate,
            },
        };
        let spec = SinkSpec {
            path,
            width: self.config.width,
            height: self.config.height,
            frame_rate,
            pixel_format: self.config.pixel_format,
        };

        match self.backends.sinks.open(&spec) {
            Ok(sink) => {
                debug!(path = %spec.path.display(), frame_rate, "Sink opened");
                Ok(CaptureChannel::new(device, sink))
            }
            Err(source) => {
                if let Err(e) = device.close() {
                    warn!("Device close failed: {}", e);
                }
                Err(RecorderError::SinkOpen {
                    serial: camera.serial.clone(),
                    source,
                })
            }
        }
    }

    /// Wait for every camera to arm, then start the synchroniser and wait
    /// for its confirmation. Returns false if a stop was requested first.
    #[instrument(name = "arm_synchroniser", skip(self, session))]
    fn arm(&mut self, session: &mut Session, index: u32) -> RecorderResult<bool> {
        self.transition(SessionState::Arming { segment: index });

        let deadline = Instant::now() + self.config.arming_timeout();
        if let Some(segment) = session.segment.as_ref() {
            loop {
                if self.stop.is_cancelled() {
                    return Ok(false);
                }
                if let Some((serial, exit)) = first_fault(segment) {
                    return Err(fault_error(serial, exit));
                }

                let pending: Vec<String> = segment
                    .channels
                    .iter()
                    .filter(|c| !c.is_ready())
                    .map(|c| c.serial().to_string())
                    .collect();
                if pending.is_empty() {
                    break;
                }
                if Instant::now() >= deadline {
                    return Err(RecorderError::ArmingTimeout { pending });
                }
                self.stop.wait_timeout(ARM_POLL);
            }
        }
        info!("All cameras waiting for trigger");

        let timeout = handshake_timeout(&self.config.synchroniser);
        let Some(sync) = session.sync.as_mut() else {
            return Ok(true);
        };

        sync.check_link()
            .map_err(|source| RecorderError::SynchroniserLost { source })?;
        if let Err(e) = sync.start() {
            warn!("Synchroniser start failed: {}", e);
            return Err(RecorderError::SynchroniserHandshakeFailed {
                marker: START_MARKER.to_string(),
            });
        }
        let confirmation = expect_marker(sync.as_mut(), START_MARKER, timeout);
        session.sync_started = true;

        let (message, skipped) =
            confirmation.map_err(|_| RecorderError::SynchroniserHandshakeFailed {
                marker: START_MARKER.to_string(),
            })?;
        for other in &skipped {
            self.forward(other);
        }
        self.forward(&message);

        session.note_with_time("Synchroniser started.", false);
        session.sync_confirmed = true;
        Ok(true)
    }

    /// Preview and control loop of a running segment.
    fn watch(&mut self, session: &mut Session) -> RecorderResult<SegmentEnd> {
        let tick = self.config.tick_interval();
        let policy = self.config.retrieval_timeout_policy;

        loop {
            if self.stop.is_cancelled() {
                return Ok(SegmentEnd::Stop);
            }
            let Some(segment) = session.segment.as_ref() else {
                return Ok(SegmentEnd::Stop);
            };

            for channel in &segment.channels {
                if let Some(frame) = channel.slot().take() {
                    self.preview.show(channel.serial(), &frame);
                }
            }

            if let Some((serial, exit)) = first_fault(segment) {
                return match exit {
                    ChannelExit::TimedOut { .. } if policy == RetrievalTimeoutPolicy::RestartSegment => {
                        Ok(SegmentEnd::Restart { serial })
                    }
                    exit => Err(fault_error(serial, exit)),
                };
            }

            match session.sync.as_mut() {
                Some(sync) => match sync.poll(tick) {
                    Some(message) => {
                        self.forward(&message);
                        if message.contains(STOP_ROLLOVER_MARKER) {
                            return Ok(SegmentEnd::Rollover);
                        }
                        debug!(text = %message.text, "Synchroniser message");
                    }
                    // Queued messages are delivered before a lost link ends the segment.
                    None => sync
                        .check_link()
                        .map_err(|source| RecorderError::SynchroniserLost { source })?,
                },
                None => {
                    self.stop.wait_timeout(tick);
                }
            }
        }
    }

    /// Signal a segment's threads and wait for them.
    fn halt(&self, segment: Segment) -> HaltedSegment {
        segment.token.cancel();
        let duration = segment.started.elapsed();

        let channels = segment
            .channels
            .into_iter()
            .map(|channel| {
                let serial = channel.serial().to_string();
                let (frames, parts) = channel.join();
                (serial, frames, parts)
            })
            .collect();

        HaltedSegment {
            index: segment.index,
            files: segment.files,
            started_at: segment.started_at,
            duration,
            channels,
        }
    }

    /// Close a halted segment's sinks and devices and account its frames.
    fn close_segment(&mut self, session: &mut Session, halted: HaltedSegment, log_line: bool) -> SegmentStats {
        self.preview.close();

        let mut frame_counts = BTreeMap::new();
        for (serial, frames, parts) in halted.channels {
            frame_counts.insert(serial.clone(), frames);
            let Some(mut parts) = parts else {
                continue;
            };
            if let Err(e) = parts.sink.close() {
                warn!(%serial, "Closing video failed: {}", e);
                let message = format!("Closing video of {serial} failed: {e}");
                session.note_with_time(&message, true);
                self.send_event(RecorderEvent::Error {
                    fatal: false,
                    message,
                });
            }
            if let Err(e) = parts.device.close() {
                warn!(%serial, "Device close failed: {}", e);
            }
        }

        let stats = SegmentStats {
            index: halted.index,
            started_at: halted.started_at,
            duration_secs: halted.duration.as_secs_f64(),
            frame_counts,
            files: halted.files,
        };
        session.tally.record(&stats);
        if log_line {
            session.note(
                &recorded_line(&stats.frame_counts, stats.duration_secs, stats.average_fps()),
                true,
            );
        }
        info!(segment = stats.index, frames = ?stats.frame_counts, "Segment closed");
        self.send_event(RecorderEvent::SegmentCompleted(stats.clone()));
        stats
    }

    /// Release everything the session holds and write the final summary.
    #[instrument(name = "session_shutdown", skip_all)]
    fn shutdown(&mut self, session: &mut Session, reason: StopReason) -> SessionSummary {
        let halted = session.segment.take().map(|segment| self.halt(segment));

        self.stop_synchroniser(session);
        session.note_with_time("Stopped recording.", true);

        if let Some(halted) = halted {
            self.close_segment(session, halted, false);
        }

        let summary = session.tally.summary(session.paths.prefix(), reason);
        session.note("", false);
        session.note(
            &recorded_line(&summary.frame_counts, summary.total_secs, summary.average_fps),
            true,
        );
        if let Err(e) = session.logger.close() {
            warn!("Closing session log failed: {}", e);
        }
        session.sync = None;
        summary
    }

    fn stop_synchroniser(&self, session: &mut Session) {
        if !session.sync_started {
            return;
        }
        session.sync_started = false;

        let timeout = handshake_timeout(&self.config.synchroniser);
        let Some(sync) = session.sync.as_mut() else {
            return;
        };

        let confirmation = match sync.stop() {
            Ok(()) => expect_marker(sync.as_mut(), STOP_PERMANENT_MARKER, timeout),
            Err(e) => Err(e),
        };
        match confirmation {
            Ok((message, skipped)) => {
                for other in &skipped {
                    self.forward(other);
                }
                self.forward(&message);
                session.note_with_time("Synchroniser stopped.", false);
            }
            Err(e) => {
                warn!("Synchroniser did not confirm stop: {}", e);
                session.note_with_time("Synchroniser did not confirm stop.", true);
            }
        }
    }

    fn forward(&self, message: &SyncMessage) {
        self.send_event(RecorderEvent::SynchroniserMessage {
            timestamp: message.timestamp.clone(),
            text: message.text.clone(),
        });
    }

    fn transition(&self, new_state: SessionState) {
        let previous = {
            let mut state = self.state.write();
            let prev = state.clone();
            *state = new_state.clone();
            prev
        };

        debug!(
            previous = %previous.name(),
            current = %new_state.name(),
            "State transition"
        );

        self.send_event(RecorderEvent::StateChanged {
            previous: Box::new(previous),
            current: Box::new(new_state),
        });
    }

    fn send_event(&self, event: RecorderEvent) {
        if let Some(events) = &self.events {
            if let Err(e) = events.try_send(event) {
                warn!("Failed to send event: {}", e);
            }
        }
    }
}

fn handshake_timeout(config: &Option<SynchroniserConfig>) -> Duration {
    config
        .as_ref()
        .map(SynchroniserConfig::handshake_timeout)
        .unwrap_or_else(|| SynchroniserConfig::default().handshake_timeout())
}

/// First channel whose thread ended.
fn first_fault(segment: &Segment) -> Option<(String, ChannelExit)> {
    segment
        .channels
        .iter()
        .find_map(|c| c.exit().map(|exit| (c.serial().to_string(), exit)))
}

fn fault_error(serial: String, exit: ChannelExit) -> RecorderError {
    match exit {
        ChannelExit::TimedOut { timeout } => RecorderError::ChannelRetrievalTimeout { serial, timeout },
        ChannelExit::Failed { message } => RecorderError::ChannelFailed { serial, message },
        ChannelExit::Cancelled => RecorderError::ChannelFailed {
            serial,
            message: "capture stopped unexpectedly".to_string(),
        },
    }
}
