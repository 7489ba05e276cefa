//! Software synchroniser driving a [`TriggerLine`].

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info, instrument, warn};

use camsync_capture::TriggerLine;
use camsync_ipc::SynchroniserConfig;

use crate::error::TriggerError;
use crate::{
    Synchroniser, SynchroniserFactory, SyncMessage, TriggerResult, INBOX_CAPACITY, START_MARKER,
    STOP_PERMANENT_MARKER, STOP_ROLLOVER_MARKER,
};

/// Pushes arbitrary messages into an emulated synchroniser's inbox.
#[derive(Debug, Clone)]
pub struct MessageInjector {
    sender: Sender<SyncMessage>,
    link: Arc<AtomicBool>,
}

impl MessageInjector {
    /// Queue `text` as if the device had sent it. Returns false when the
    /// inbox is full.
    pub fn inject(&self, text: &str) -> bool {
        self.sender.try_send(SyncMessage::now(text)).is_ok()
    }

    /// Pull the emulated cable. Commands fail and [`Synchroniser::check_link`]
    /// reports the loss.
    pub fn disconnect(&self) {
        self.link.store(false, Ordering::SeqCst);
    }
}

struct Pulser {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Emulated trigger device.
///
/// While started, fires the trigger line at the configured rate and, if
/// asked to, requests a rollover at a fixed interval.
pub struct EmulatedSynchroniser {
    line: Arc<TriggerLine>,
    frame_rate: f64,
    rollover_every: Option<Duration>,
    silent: bool,
    sender: Sender<SyncMessage>,
    inbox: Receiver<SyncMessage>,
    link: Arc<AtomicBool>,
    pulser: Option<Pulser>,
}

impl EmulatedSynchroniser {
    /// Synchroniser firing `line` at `frame_rate` Hz.
    pub fn new(line: Arc<TriggerLine>, frame_rate: f64) -> Self {
        let (sender, inbox) = crossbeam_channel::bounded(INBOX_CAPACITY);
        Self::with_inbox(line, frame_rate, sender, inbox, Arc::new(AtomicBool::new(true)))
    }

    fn with_inbox(
        line: Arc<TriggerLine>,
        frame_rate: f64,
        sender: Sender<SyncMessage>,
        inbox: Receiver<SyncMessage>,
        link: Arc<AtomicBool>,
    ) -> Self {
        Self {
            line,
            frame_rate,
            rollover_every: None,
            silent: false,
            sender,
            inbox,
            link,
            pulser: None,
        }
    }

    /// Request a rollover every `interval` while started.
    pub fn with_rollover_every(mut self, interval: Duration) -> Self {
        self.rollover_every = Some(interval);
        self
    }

    /// Never confirm start or stop.
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// Handle for injecting messages.
    pub fn injector(&self) -> MessageInjector {
        MessageInjector {
            sender: self.sender.clone(),
            link: Arc::clone(&self.link),
        }
    }

    fn is_linked(&self) -> bool {
        self.link.load(Ordering::SeqCst)
    }

    fn emit(&self, text: &str) {
        if self.silent {
            return;
        }
        if self.sender.try_send(SyncMessage::now(text)).is_err() {
            warn!(text, "Emulated synchroniser inbox full");
        }
    }

    fn halt(&mut self) {
        if let Some(pulser) = self.pulser.take() {
            pulser.running.store(false, Ordering::SeqCst);
            if pulser.handle.join().is_err() {
                warn!("Pulse thread panicked");
            }
        }
    }
}

fn run_pulses(
    line: Arc<TriggerLine>,
    period: Duration,
    rollover_every: Option<Duration>,
    silent: bool,
    sender: Sender<SyncMessage>,
    running: Arc<AtomicBool>,
) {
    let mut next_pulse = Instant::now();
    let mut last_rollover = Instant::now();

    while running.load(Ordering::SeqCst) {
        line.pulse();

        if let Some(interval) = rollover_every {
            if last_rollover.elapsed() >= interval {
                last_rollover = Instant::now();
                if !silent {
                    let _ = sender.try_send(SyncMessage::now(STOP_ROLLOVER_MARKER));
                }
            }
        }

        next_pulse += period;
        let now = Instant::now();
        if next_pulse > now {
            thread::sleep(next_pulse - now);
        } else {
            next_pulse = now;
        }
    }
    debug!(pulses = line.pulse_count(), "Pulse thread exiting");
}

impl Synchroniser for EmulatedSynchroniser {
    #[instrument(name = "emulated_synchroniser_start", skip(self))]
    fn start(&mut self) -> TriggerResult<()> {
        if !self.is_linked() {
            return Err(TriggerError::Disconnected);
        }
        if self.pulser.is_some() {
            return Ok(());
        }

        let running = Arc::new(AtomicBool::new(true));
        let period = Duration::from_secs_f64(1.0 / self.frame_rate.max(0.1));
        let line = Arc::clone(&self.line);
        let rollover_every = self.rollover_every;
        let silent = self.silent;
        let sender = self.sender.clone();
        let flag = Arc::clone(&running);

        let handle = thread::Builder::new()
            .name("sync-pulses".into())
            .spawn(move || run_pulses(line, period, rollover_every, silent, sender, flag))?;

        self.pulser = Some(Pulser { running, handle });
        info!(fps = self.frame_rate, "Emulated synchroniser firing");
        self.emit(START_MARKER);
        Ok(())
    }

    #[instrument(name = "emulated_synchroniser_stop", skip(self))]
    fn stop(&mut self) -> TriggerResult<()> {
        self.halt();
        if !self.is_linked() {
            return Err(TriggerError::Disconnected);
        }
        self.emit(STOP_PERMANENT_MARKER);
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> Option<SyncMessage> {
        self.inbox.recv_timeout(timeout).ok()
    }

    fn try_poll(&mut self) -> Option<SyncMessage> {
        self.inbox.try_recv().ok()
    }

    fn check_link(&self) -> TriggerResult<()> {
        if self.is_linked() {
            Ok(())
        } else {
            Err(TriggerError::Disconnected)
        }
    }
}

impl Drop for EmulatedSynchroniser {
    fn drop(&mut self) {
        self.halt();
    }
}

/// Hands out [`EmulatedSynchroniser`]s sharing one trigger line and inbox.
pub struct EmulatedSynchroniserFactory {
    line: Arc<TriggerLine>,
    rollover_every: Option<Duration>,
    silent: bool,
    sender: Sender<SyncMessage>,
    inbox: Receiver<SyncMessage>,
    link: Arc<AtomicBool>,
    connections: AtomicUsize,
}

impl EmulatedSynchroniserFactory {
    /// Factory firing `line`.
    pub fn new(line: Arc<TriggerLine>) -> Self {
        let (sender, inbox) = crossbeam_channel::bounded(INBOX_CAPACITY);
        Self {
            line,
            rollover_every: None,
            silent: false,
            sender,
            inbox,
            link: Arc::new(AtomicBool::new(true)),
            connections: AtomicUsize::new(0),
        }
    }

    /// Synchronisers request a rollover every `interval`.
    pub fn with_rollover_every(mut self, interval: Duration) -> Self {
        self.rollover_every = Some(interval);
        self
    }

    /// Synchronisers never confirm start or stop.
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// Injector reaching whichever synchroniser is connected.
    pub fn injector(&self) -> MessageInjector {
        MessageInjector {
            sender: self.sender.clone(),
            link: Arc::clone(&self.link),
        }
    }

    /// Number of successful connects.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl SynchroniserFactory for EmulatedSynchroniserFactory {
    fn connect(&self, config: &SynchroniserConfig) -> TriggerResult<Box<dyn Synchroniser>> {
        // Leftovers from a previous session.
        while self.inbox.try_recv().is_ok() {}
        self.link.store(true, Ordering::SeqCst);

        let mut sync = EmulatedSynchroniser::with_inbox(
            Arc::clone(&self.line),
            config.frame_rate,
            self.sender.clone(),
            self.inbox.clone(),
            Arc::clone(&self.link),
        );
        sync.rollover_every = self.rollover_every;
        sync.silent = self.silent;

        self.connections.fetch_add(1, Ordering::SeqCst);
        debug!(fps = config.frame_rate, "Emulated synchroniser connected");
        Ok(Box::new(sync))
    }
}
