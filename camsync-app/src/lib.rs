//! camsync command line application.
//!
//! Wires the emulated devices and the ffmpeg sinks into a recorder, runs a
//! single session and reports its events.

pub mod cli;
mod commands;
pub mod config;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use camsync_capture::{EmulatedBackend, TriggerLine};
use camsync_encoder::FfmpegSinkFactory;
use camsync_engine::{create_recorder, format_counts, human_duration, Backends, PreviewSurface, TracingPreview};
use camsync_ipc::{command_channel, event_channel, RecorderEvent};
use camsync_trigger::{EmulatedSynchroniserFactory, SerialSynchroniserFactory, SynchroniserFactory};

use crate::cli::CliArgs;
use crate::config::{AppConfig, SynchroniserBackend};

/// Initialize logging.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "camsync=info,camsync_app=info,camsync_engine=info,camsync_capture=info,camsync_encoder=info,camsync_trigger=info".into()
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Devices described by `config`.
pub fn build_backends(config: &AppConfig) -> Backends {
    let line = TriggerLine::new();
    let cameras = EmulatedBackend::new(config.devices.cameras).with_trigger_line(Arc::clone(&line));

    let synchronisers: Arc<dyn SynchroniserFactory> = match config.devices.synchroniser {
        SynchroniserBackend::Serial => {
            if config.session.is_synchronised() {
                warn!("Emulated cameras do not see pulses from a serial synchroniser");
            }
            Arc::new(SerialSynchroniserFactory::default())
        }
        SynchroniserBackend::Emulated => {
            let mut factory = EmulatedSynchroniserFactory::new(line);
            if let Some(interval) = config.devices.rollover_interval() {
                factory = factory.with_rollover_every(interval);
            }
            Arc::new(factory)
        }
    };

    Backends {
        cameras: Arc::new(cameras),
        sinks: Arc::new(FfmpegSinkFactory::new(config.encoder.clone())),
        synchronisers,
    }
}

/// Run one session until it stops. Blocks.
pub fn run(args: CliArgs) -> anyhow::Result<()> {
    let config = AppConfig::load(&args)?;

    if args.dry_run {
        let text = if args.json {
            serde_json::to_string_pretty(&config)?
        } else {
            toml::to_string_pretty(&config).context("Cannot print configuration")?
        };
        println!("{text}");
        return Ok(());
    }

    info!(
        cameras = config.devices.cameras,
        output = %config.session.output_dir.display(),
        synchronised = config.session.is_synchronised(),
        "camsync starting"
    );

    let (command_tx, command_rx) = command_channel();
    let (event_tx, event_rx) = event_channel();

    let backends = build_backends(&config);
    let recorder = thread::Builder::new()
        .name("recorder".to_string())
        .spawn(move || {
            let mut recorder = create_recorder(command_rx, event_tx, backends)
                .with_preview(|| -> Box<dyn PreviewSurface> { Box::new(TracingPreview::default()) });
            recorder.run();
        })
        .context("Cannot start recorder thread")?;

    let interrupt_tx = command_tx.clone();
    ctrlc::set_handler(move || {
        let _ = commands::stop_session(&interrupt_tx);
    })
    .context("Cannot install Ctrl-C handler")?;

    let mut failure = None;
    while let Ok(event) = event_rx.recv() {
        if args.json {
            println!("{}", serde_json::to_string(&event)?);
        }

        match &event {
            RecorderEvent::Ready => {
                commands::start_session(&command_tx, config.session.clone())?;
                if let Some(secs) = args.duration.filter(|secs| *secs > 0.0) {
                    let stop_tx = command_tx.clone();
                    thread::spawn(move || {
                        thread::sleep(Duration::from_secs_f64(secs));
                        info!(secs, "Duration reached");
                        let _ = commands::stop_session(&stop_tx);
                    });
                }
            }
            RecorderEvent::Error { fatal: true, message } => failure = Some(message.clone()),
            RecorderEvent::SessionFinished(summary) => {
                info!(
                    segments = summary.segments,
                    frames = %format_counts(&summary.frame_counts),
                    recorded = %human_duration(summary.total_secs),
                    fps = summary.average_fps,
                    "Session finished"
                );
                commands::shutdown(&command_tx)?;
            }
            RecorderEvent::Shutdown => break,
            _ => {}
        }
    }

    if recorder.join().is_err() {
        bail!("Recorder thread panicked");
    }
    if let Some(message) = failure {
        bail!(message);
    }
    Ok(())
}
