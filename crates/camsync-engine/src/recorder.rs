//! Command-driven recorder.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;
use tracing::{debug, error, info, instrument, warn};

use camsync_capture::StopToken;
use camsync_ipc::{RecorderCommand, RecorderEvent, SessionConfig, SessionState, SessionSummary};

use crate::error::RecorderError;
use crate::preview::{NullPreview, PreviewSurface};
use crate::supervisor::{Backends, SessionSupervisor};
use crate::RecorderResult;

type PreviewFactory = Box<dyn Fn() -> Box<dyn PreviewSurface> + Send>;

struct ActiveSession {
    stop: StopToken,
    handle: JoinHandle<RecorderResult<SessionSummary>>,
}

/// Runs sessions on request of a controller.
///
/// Each session's supervisor runs on its own thread; this loop only
/// starts, stops and reaps it.
pub struct Recorder {
    command_rx: Receiver<RecorderCommand>,
    event_tx: Sender<RecorderEvent>,
    state: Arc<RwLock<SessionState>>,
    backends: Backends,
    preview_factory: PreviewFactory,
    session: Option<ActiveSession>,
}

impl Recorder {
    /// Create a new recorder.
    pub fn new(
        command_rx: Receiver<RecorderCommand>,
        event_tx: Sender<RecorderEvent>,
        backends: Backends,
    ) -> Self {
        Self {
            command_rx,
            event_tx,
            state: Arc::new(RwLock::new(SessionState::Idle)),
            backends,
            preview_factory: Box::new(|| Box::new(NullPreview) as Box<dyn PreviewSurface>),
            session: None,
        }
    }

    /// Build each session's preview surface with `factory`.
    pub fn with_preview<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn PreviewSurface> + Send + 'static,
    {
        self.preview_factory = Box::new(factory);
        self
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.state.read().clone()
    }

    /// Run the recorder (blocking).
    #[instrument(name = "recorder_run", skip(self))]
    pub fn run(&mut self) {
        info!("Recorder starting");
        self.send_event(RecorderEvent::Ready);

        loop {
            match self.command_rx.recv_timeout(Duration::from_millis(100)) {
                Ok(command) => {
                    if !self.handle_command(command) {
                        break;
                    }
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => self.reap_finished(),
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    info!("Command channel disconnected, shutting down");
                    self.stop_session();
                    break;
                }
            }
        }

        info!("Recorder stopped");
    }

    /// Handle a command. Returns false if the recorder should stop.
    fn handle_command(&mut self, command: RecorderCommand) -> bool {
        debug!(?command, "Handling command");

        match command {
            RecorderCommand::Start { config } => self.start_session(config),
            RecorderCommand::Stop => self.stop_session(),
            RecorderCommand::GetState => self.send_state(),
            RecorderCommand::Shutdown => {
                self.stop_session();
                self.send_event(RecorderEvent::Shutdown);
                return false;
            }
        }

        true
    }

    #[instrument(name = "start_session", skip(self, config))]
    fn start_session(&mut self, config: SessionConfig) {
        self.reap_finished();
        if self.session.is_some() {
            debug!(reason = %RecorderError::AlreadyRunning, "Ignoring start command");
            return;
        }

        let stop = StopToken::new();
        let supervisor = SessionSupervisor::new(config, self.backends.clone())
            .with_preview((self.preview_factory)())
            .with_events(self.event_tx.clone())
            .with_state(Arc::clone(&self.state))
            .with_stop_token(stop.clone());

        match thread::Builder::new()
            .name("session".to_string())
            .spawn(move || supervisor.run())
        {
            Ok(handle) => {
                info!("Session started");
                self.session = Some(ActiveSession { stop, handle });
            }
            Err(e) => {
                let err = RecorderError::from(e);
                error!("Session start failed: {}", err);
                self.send_event(RecorderEvent::Error {
                    fatal: true,
                    message: err.to_string(),
                });
            }
        }
    }

    #[instrument(name = "stop_session", skip(self))]
    fn stop_session(&mut self) {
        let Some(session) = self.session.take() else {
            debug!("No session running, ignoring stop command");
            return;
        };

        info!("Stopping session");
        session.stop.cancel();
        Self::finish(session);
    }

    /// Join a session whose thread already ended.
    fn reap_finished(&mut self) {
        if self
            .session
            .as_ref()
            .is_some_and(|session| session.handle.is_finished())
        {
            if let Some(session) = self.session.take() {
                Self::finish(session);
            }
        }
    }

    fn finish(session: ActiveSession) {
        match session.handle.join() {
            Ok(Ok(summary)) => info!(
                segments = summary.segments,
                frames = ?summary.frame_counts,
                "Session finished"
            ),
            Ok(Err(e)) => warn!("Session ended with error: {}", e),
            Err(_) => error!("Session thread panicked"),
        }
    }

    fn send_state(&self) {
        let state = self.state.read().clone();
        self.send_event(RecorderEvent::StateChanged {
            previous: Box::new(state.clone()),
            current: Box::new(state),
        });
    }

    fn send_event(&self, event: RecorderEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            warn!("Failed to send event: {}", e);
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.stop.cancel();
            let _ = session.handle.join();
        }
    }
}
