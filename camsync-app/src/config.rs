//! Configuration file handling.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use camsync_encoder::FfmpegConfig;
use camsync_ipc::{SessionConfig, SynchroniserConfig};

use crate::cli::CliArgs;

/// Where the synchroniser comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynchroniserBackend {
    /// Serial device found with the session's matcher.
    Serial,

    /// Software pulses on the emulated cameras' trigger line.
    #[default]
    Emulated,
}

/// Device options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Emulated cameras to serve.
    pub cameras: usize,

    /// Synchroniser implementation used when `session.synchroniser` is set.
    pub synchroniser: SynchroniserBackend,

    /// Automatic rollover interval of the emulated synchroniser.
    pub rollover_secs: Option<f64>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            cameras: 2,
            synchroniser: SynchroniserBackend::default(),
            rollover_secs: None,
        }
    }
}

impl DeviceConfig {
    pub fn rollover_interval(&self) -> Option<Duration> {
        self.rollover_secs
            .filter(|secs| *secs > 0.0)
            .map(Duration::from_secs_f64)
    }
}

/// Everything the binary reads from its TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub session: SessionConfig,
    pub encoder: FfmpegConfig,
    pub devices: DeviceConfig,
}

impl AppConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Cannot read config file {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Configuration from the file named on the command line, with flag
    /// overrides applied.
    pub fn load(args: &CliArgs) -> anyhow::Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply(args);
        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, args: &CliArgs) {
        if let Some(dir) = &args.output_dir {
            self.session.output_dir = dir.clone();
        }
        if let Some(cameras) = args.cameras {
            self.devices.cameras = cameras;
        }
        if let Some(fps) = args.synchroniser_fps {
            let sync = self
                .session
                .synchroniser
                .get_or_insert_with(SynchroniserConfig::default);
            sync.frame_rate = fps;
        }
        if let Some(secs) = args.rollover_secs {
            self.devices.rollover_secs = Some(secs);
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.session.frame_rate <= 0.0 && self.session.synchroniser.is_none() {
            bail!("frame_rate must be positive, got {}", self.session.frame_rate);
        }
        if let Some(sync) = &self.session.synchroniser {
            if sync.frame_rate <= 0.0 {
                bail!("synchroniser frame_rate must be positive, got {}", sync.frame_rate);
            }
        }
        if self.session.width == 0 || self.session.height == 0 {
            bail!(
                "image size must not be empty, got {}x{}",
                self.session.width,
                self.session.height
            );
        }
        Ok(())
    }
}
