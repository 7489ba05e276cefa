//! Per-session text log.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::info;

/// Append-only log file written next to a session's videos.
///
/// The first line is the session stamp. Echoed lines are also emitted on
/// the `camsync::session` tracing target.
pub struct SessionLogger {
    path: PathBuf,
    file: Option<BufWriter<File>>,
}

impl SessionLogger {
    /// Create the log at `path`, creating its directory if needed. The
    /// first line is `stamp`.
    pub fn create(path: PathBuf, stamp: &str) -> io::Result<Self> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let file = File::create(&path)?;

        let mut logger = Self {
            path,
            file: Some(BufWriter::new(file)),
        };
        logger.log(stamp, true)?;
        Ok(logger)
    }

    /// Log file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `message`, newline terminated.
    pub fn log(&mut self, message: &str, echo: bool) -> io::Result<()> {
        if echo {
            info!(target: "camsync::session", "{}", message.trim_end());
        }

        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "session log closed"))?;
        file.write_all(message.as_bytes())?;
        if !message.ends_with('\n') {
            file.write_all(b"\n")?;
        }
        file.flush()
    }

    /// Append `<iso-time> - message`. Returns the time stamp used.
    pub fn log_with_time(&mut self, message: &str, echo: bool) -> io::Result<String> {
        let stamp = local_iso_now();
        self.log(&format!("{stamp} - {message}"), echo)?;
        Ok(stamp)
    }

    /// Flush and close. Idempotent.
    pub fn close(&mut self) -> io::Result<()> {
        match self.file.take() {
            Some(mut file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for SessionLogger {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Current local time, ISO-8601 with microseconds.
pub fn local_iso_now() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

/// Human readable duration.
///
/// Below one minute `"12.34 seconds"`, otherwise `"01:02:03.45 hh:mm:ss.ss"`,
/// with `"NN days "` in front from one day on.
pub fn human_duration(secs: f64) -> String {
    let secs = secs.max(0.0);
    let days = (secs / 86_400.0).floor() as u64;
    let hours = (secs / 3_600.0).floor() as u64 % 24;
    let minutes = (secs / 60.0).floor() as u64 % 60;
    let seconds = secs % 60.0;

    let mut result = if days == 0 && hours == 0 && minutes == 0 {
        format!("{seconds:.2} seconds")
    } else {
        format!("{hours:02}:{minutes:02}:{seconds:05.2} hh:mm:ss.ss")
    };
    if days > 0 {
        result = format!("{days:02} days {result}");
    }
    result
}
