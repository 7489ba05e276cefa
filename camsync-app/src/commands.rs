//! Operator commands sent to the recorder.

use anyhow::Context;
use crossbeam_channel::Sender;
use tracing::{debug, instrument};

use camsync_ipc::{RecorderCommand, SessionConfig};

/// Start a session with `config`.
#[instrument(skip(command_tx, config))]
pub fn start_session(command_tx: &Sender<RecorderCommand>, config: SessionConfig) -> anyhow::Result<()> {
    debug!("start_session command");
    command_tx
        .send(RecorderCommand::Start { config })
        .context("Failed to send start command")
}

/// Stop the running session.
#[instrument(skip(command_tx))]
pub fn stop_session(command_tx: &Sender<RecorderCommand>) -> anyhow::Result<()> {
    debug!("stop_session command");
    command_tx
        .send(RecorderCommand::Stop)
        .context("Failed to send stop command")
}

/// Shut the recorder down.
#[instrument(skip(command_tx))]
pub fn shutdown(command_tx: &Sender<RecorderCommand>) -> anyhow::Result<()> {
    debug!("shutdown command");
    command_tx
        .send(RecorderCommand::Shutdown)
        .context("Failed to send shutdown command")
}
