//! Raw frames piped into an ffmpeg process.

use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use camsync_capture::Frame;

use crate::error::EncoderError;
use crate::{pixel_format_tag, EncoderResult, FrameSink, SinkFactory, SinkSpec};

/// How long `close` waits for ffmpeg to finalise the container.
const FINALISE_TIMEOUT: Duration = Duration::from_secs(10);

/// ffmpeg invocation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FfmpegConfig {
    /// ffmpeg executable.
    pub program: String,

    /// Arguments inserted between the input and the output path.
    pub output_args: Vec<String>,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".into(),
            output_args: Vec::new(),
        }
    }
}

/// Build the ffmpeg command that reads raw frames from stdin.
pub fn build_ffmpeg_command(config: &FfmpegConfig, spec: &SinkSpec, pix_fmt: &str) -> Command {
    let mut cmd = Command::new(&config.program);
    cmd.arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .arg("-y")
        .arg("-f")
        .arg("rawvideo")
        .arg("-pix_fmt")
        .arg(pix_fmt)
        .arg("-s")
        .arg(format!("{}x{}", spec.width, spec.height))
        .arg("-r")
        .arg(format!("{}", spec.frame_rate))
        .arg("-i")
        .arg("pipe:0");

    cmd.args(&config.output_args);
    cmd.arg(&spec.path);
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    cmd
}

/// Opens [`FfmpegSink`]s.
#[derive(Debug, Clone, Default)]
pub struct FfmpegSinkFactory {
    config: FfmpegConfig,
}

impl FfmpegSinkFactory {
    /// Create a factory using `config` for every sink.
    pub fn new(config: FfmpegConfig) -> Self {
        Self { config }
    }
}

impl SinkFactory for FfmpegSinkFactory {
    fn open(&self, spec: &SinkSpec) -> EncoderResult<Box<dyn FrameSink>> {
        Ok(Box::new(FfmpegSink::open(&self.config, spec)?))
    }
}

/// One ffmpeg process writing one video file.
pub struct FfmpegSink {
    path: PathBuf,
    frame_size: usize,
    child: Child,
    stdin: Option<BufWriter<ChildStdin>>,
    stderr_thread: Option<JoinHandle<()>>,
    frames_written: u64,
    closed: bool,
}

impl FfmpegSink {
    /// Spawn ffmpeg for `spec`.
    #[instrument(name = "ffmpeg_sink_open", skip_all, fields(path = %spec.path.display()))]
    pub fn open(config: &FfmpegConfig, spec: &SinkSpec) -> EncoderResult<Self> {
        let pix_fmt = pixel_format_tag(spec.pixel_format)?;

        let parent = match spec.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        if !parent.is_dir() {
            return Err(EncoderError::UnwritablePath(spec.path.clone()));
        }

        let mut child = build_ffmpeg_command(config, spec, pix_fmt)
            .spawn()
            .map_err(|source| EncoderError::Spawn {
                program: config.program.clone(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .map(BufWriter::new)
            .ok_or_else(|| EncoderError::InvalidInput("encoder stdin unavailable".into()))?;

        let stderr_thread = child.stderr.take().map(|stderr| {
            let path = spec.path.clone();
            thread::spawn(move || {
                for line in BufReader::new(stderr).lines() {
                    match line {
                        Ok(line) => warn!(path = %path.display(), "[ffmpeg] {}", line),
                        Err(e) => {
                            debug!("[ffmpeg] stderr closed: {}", e);
                            break;
                        }
                    }
                }
            })
        });

        info!(
            pix_fmt,
            width = spec.width,
            height = spec.height,
            fps = spec.frame_rate,
            "Encoder started"
        );

        Ok(Self {
            path: spec.path.clone(),
            frame_size: spec.frame_size(),
            child,
            stdin: Some(stdin),
            stderr_thread,
            frames_written: 0,
            closed: false,
        })
    }

    fn wait_for_exit(&mut self) -> EncoderResult<()> {
        let started = Instant::now();
        let status = loop {
            if let Some(status) = self.child.try_wait()? {
                break status;
            }
            if started.elapsed() > FINALISE_TIMEOUT {
                warn!(path = %self.path.display(), "Encoder did not exit in time, killing");
                let _ = self.child.kill();
                break self.child.wait()?;
            }
            thread::sleep(Duration::from_millis(20));
        };

        if let Some(handle) = self.stderr_thread.take() {
            let _ = handle.join();
        }

        if status.success() {
            Ok(())
        } else {
            Err(EncoderError::EncoderFailed {
                path: self.path.clone(),
                status: status.to_string(),
            })
        }
    }
}

impl FrameSink for FfmpegSink {
    fn write(&mut self, frame: &Frame) -> EncoderResult<()> {
        if frame.data.len() != self.frame_size {
            return Err(EncoderError::InvalidInput(format!(
                "frame {} has {} bytes, expected {}",
                frame.sequence,
                frame.data.len(),
                self.frame_size
            )));
        }

        let stdin = self.stdin.as_mut().ok_or(EncoderError::Closed)?;
        match stdin.write_all(&frame.data) {
            Ok(()) => {
                self.frames_written += 1;
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                Err(EncoderError::EncoderExited(self.path.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(name = "ffmpeg_sink_close", skip(self), fields(path = %self.path.display()))]
    fn close(&mut self) -> EncoderResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        // Closing stdin is ffmpeg's end-of-stream.
        let flushed = match self.stdin.take() {
            Some(mut stdin) => stdin.flush(),
            None => Ok(()),
        };

        let exited = self.wait_for_exit();
        debug!(frames = self.frames_written, "Encoder closed");

        match flushed {
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                Err(EncoderError::EncoderExited(self.path.clone()))
            }
            Err(e) => Err(e.into()),
            Ok(()) => exited,
        }
    }

    fn abort(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.stdin = None;

        let _ = self.child.kill();
        let _ = self.child.wait();
        if let Some(handle) = self.stderr_thread.take() {
            let _ = handle.join();
        }
        if self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), "Failed to remove partial file: {}", e);
            }
        }
        debug!(path = %self.path.display(), "Encoder aborted");
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Encoder close on drop failed: {}", e);
        }
    }
}
