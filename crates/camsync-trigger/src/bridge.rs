//! Byte-stream link to a synchroniser device.
//!
//! The device speaks newline-terminated text in both directions. A reader
//! task on the bridge's own tokio runtime turns incoming lines into
//! [`SyncMessage`]s on a bounded crossbeam inbox; commands are written
//! synchronously from the caller's thread.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::RwLock;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::runtime::Runtime;
use tracing::{debug, info, instrument, warn};

use camsync_ipc::SynchroniserConfig;

use crate::error::TriggerError;
use crate::matcher::{DeviceMatcher, SysfsPortLocator};
use crate::{Synchroniser, SynchroniserFactory, SyncMessage, TriggerResult, INBOX_CAPACITY};

/// How long dropping a bridge waits for its reader task.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(500);

/// Link state of a bridge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LinkState {
    /// Device closed the link.
    #[default]
    Disconnected,

    /// Link open, device idle.
    Connected,

    /// Start command sent.
    Armed,

    /// Link broke with an error.
    Failed { reason: String },
}

impl LinkState {
    /// Check if the link is open.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Armed)
    }

    /// Check if the device was told to fire.
    pub fn is_armed(&self) -> bool {
        matches!(self, Self::Armed)
    }

    /// Check if failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Get status message for display.
    pub fn message(&self) -> String {
        match self {
            Self::Disconnected => "Disconnected".to_string(),
            Self::Connected => "Connected".to_string(),
            Self::Armed => "Armed".to_string(),
            Self::Failed { reason } => format!("Failed: {}", reason),
        }
    }
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Connected synchroniser over any async byte stream.
pub struct SynchroniserBridge {
    config: SynchroniserConfig,
    runtime: Option<Runtime>,
    writer: Option<BoxedWriter>,
    inbox: Receiver<SyncMessage>,
    state: Arc<RwLock<LinkState>>,
    dropped: Arc<AtomicU64>,
}

impl SynchroniserBridge {
    /// Open the serial device at `path`.
    #[instrument(name = "synchroniser_open", skip(config))]
    pub fn open(path: &Path, config: SynchroniserConfig) -> TriggerResult<Self> {
        let read_half = OpenOptions::new().read(true).open(path)?;
        let write_half = OpenOptions::new().write(true).open(path)?;
        info!("Opened synchroniser port");

        Self::with_io(
            tokio::fs::File::from_std(read_half),
            tokio::fs::File::from_std(write_half),
            config,
        )
    }

    /// Bridge over an already open stream pair.
    pub fn with_io<R, W>(reader: R, writer: W, config: SynchroniserConfig) -> TriggerResult<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let runtime = Runtime::new()?;
        let (sender, inbox) = crossbeam_channel::bounded(INBOX_CAPACITY);
        let state = Arc::new(RwLock::new(LinkState::Connected));
        let dropped = Arc::new(AtomicU64::new(0));

        runtime.spawn(read_messages(
            reader,
            sender,
            Arc::clone(&state),
            Arc::clone(&dropped),
        ));

        Ok(Self {
            config,
            runtime: Some(runtime),
            writer: Some(Box::new(writer)),
            inbox,
            state,
            dropped,
        })
    }

    /// Current link state.
    pub fn state(&self) -> LinkState {
        self.state.read().clone()
    }

    /// Messages lost because the inbox was full.
    pub fn dropped_messages(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn send_line(&mut self, line: &str) -> TriggerResult<()> {
        let runtime = self.runtime.as_ref().ok_or(TriggerError::Disconnected)?;
        let writer = self.writer.as_mut().ok_or(TriggerError::Disconnected)?;

        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\n');
        runtime.block_on(async {
            writer.write_all(&bytes).await?;
            writer.flush().await
        })?;
        debug!(line, "Sent synchroniser command");
        Ok(())
    }
}

async fn read_messages<R>(
    reader: R,
    inbox: Sender<SyncMessage>,
    state: Arc<RwLock<LinkState>>,
    dropped: Arc<AtomicU64>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let text = line.trim_end();
                if text.is_empty() {
                    continue;
                }
                match inbox.try_send(SyncMessage::now(text)) {
                    Ok(()) => {}
                    Err(TrySendError::Full(msg)) => {
                        dropped.fetch_add(1, Ordering::Relaxed);
                        warn!(text = %msg.text, "Synchroniser inbox full, message dropped");
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        debug!("Synchroniser inbox closed");
                        return;
                    }
                }
            }
            Ok(None) => {
                info!("Synchroniser closed the link");
                *state.write() = LinkState::Disconnected;
                return;
            }
            Err(e) => {
                warn!("Synchroniser read error: {}", e);
                *state.write() = LinkState::Failed {
                    reason: e.to_string(),
                };
                return;
            }
        }
    }
}

impl Synchroniser for SynchroniserBridge {
    #[instrument(name = "synchroniser_start", skip(self))]
    fn start(&mut self) -> TriggerResult<()> {
        let command = self.config.start_command.clone();
        self.send_line(&command)?;
        *self.state.write() = LinkState::Armed;
        Ok(())
    }

    #[instrument(name = "synchroniser_stop", skip(self))]
    fn stop(&mut self) -> TriggerResult<()> {
        let command = self.config.stop_command.clone();
        self.send_line(&command)?;
        let mut state = self.state.write();
        if state.is_armed() {
            *state = LinkState::Connected;
        }
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> Option<SyncMessage> {
        self.inbox.recv_timeout(timeout).ok()
    }

    fn try_poll(&mut self) -> Option<SyncMessage> {
        self.inbox.try_recv().ok()
    }

    fn check_link(&self) -> TriggerResult<()> {
        match self.state() {
            LinkState::Connected | LinkState::Armed => Ok(()),
            LinkState::Disconnected => Err(TriggerError::Disconnected),
            LinkState::Failed { reason } => Err(TriggerError::LinkFailed(reason)),
        }
    }
}

impl Drop for SynchroniserBridge {
    fn drop(&mut self) {
        let dropped = self.dropped_messages();
        if dropped > 0 {
            warn!(dropped, "Synchroniser messages lost to a full inbox");
        }
        self.writer = None;
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
        }
    }
}

/// Connects [`SynchroniserBridge`]s to serial ports found via sysfs.
#[derive(Debug, Clone, Default)]
pub struct SerialSynchroniserFactory {
    locator: SysfsPortLocator,
}

impl SerialSynchroniserFactory {
    /// Factory scanning with `locator`.
    pub fn new(locator: SysfsPortLocator) -> Self {
        Self { locator }
    }
}

impl SynchroniserFactory for SerialSynchroniserFactory {
    fn connect(&self, config: &SynchroniserConfig) -> TriggerResult<Box<dyn Synchroniser>> {
        let matcher: DeviceMatcher = config.matcher.parse()?;
        let path = self.locator.locate(&matcher)?;
        Ok(Box::new(SynchroniserBridge::open(&path, config.clone())?))
    }
}
