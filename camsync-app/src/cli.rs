//! Command line arguments.

use std::path::PathBuf;

use clap::Parser;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "CAMSYNC_CONFIG";

/// Record every connected camera into per-camera video files.
#[derive(Parser, Debug, Default)]
#[command(name = "camsync", author, version, about, long_about = None)]
pub struct CliArgs {
    /// TOML configuration file
    #[arg(short, long, value_name = "FILE", env = CONFIG_ENV)]
    pub config: Option<PathBuf>,

    /// Directory receiving videos and the session log
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Number of emulated cameras
    #[arg(long, value_name = "N")]
    pub cameras: Option<usize>,

    /// Stop automatically after this many seconds
    #[arg(short, long, value_name = "SECS")]
    pub duration: Option<f64>,

    /// Trigger cameras from a synchroniser firing at this rate
    #[arg(long, value_name = "HZ")]
    pub synchroniser_fps: Option<f64>,

    /// Emulated synchroniser requests a rollover this often
    #[arg(long, value_name = "SECS")]
    pub rollover_secs: Option<f64>,

    /// Print events as JSON lines on stdout
    #[arg(long)]
    pub json: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    pub dry_run: bool,
}

impl CliArgs {
    pub fn parse_args() -> Self {
        CliArgs::parse()
    }
}
