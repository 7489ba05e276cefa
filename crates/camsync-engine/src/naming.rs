//! Output file layout of a session.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::Local;

use camsync_ipc::SessionConfig;

/// Local-time stamp used for session and segment names.
pub const STAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Current local time formatted with [`STAMP_FORMAT`].
pub fn timestamp_now() -> String {
    Local::now().format(STAMP_FORMAT).to_string()
}

/// Paths of one session's log and video files.
#[derive(Debug, Clone)]
pub struct SessionPaths {
    dir: PathBuf,
    prefix: String,
    container: String,
    used: HashSet<PathBuf>,
}

impl SessionPaths {
    /// Layout for a session named `prefix`.
    pub fn new(config: &SessionConfig, prefix: String) -> Self {
        let dir = if config.session_subdirectory {
            config.output_dir.join(&prefix)
        } else {
            config.output_dir.clone()
        };

        Self {
            dir,
            prefix,
            container: config.container.trim_start_matches('.').to_string(),
            used: HashSet::new(),
        }
    }

    /// Directory receiving every file of the session.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Session stamp.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// `<prefix>_rec_log.txt`.
    pub fn log_file(&self) -> PathBuf {
        self.dir.join(format!("{}_rec_log.txt", self.prefix))
    }

    fn video_file(&self, stamp: &str, serial: &str) -> PathBuf {
        self.dir
            .join(format!("{}_{}_rec.{}", stamp, serial, self.container))
    }

    /// Claim one video path per serial for segment `index`.
    ///
    /// When any of the names was already taken, by this session or by a
    /// file on disk, the whole segment gets a `-<index>` suffix on its stamp,
    /// then `-<index>-<n>` until every name is free.
    pub fn reserve(&mut self, stamp: &str, index: u32, serials: &[String]) -> Vec<PathBuf> {
        let taken = |paths: &[PathBuf], used: &HashSet<PathBuf>| {
            paths.iter().any(|p| used.contains(p) || p.exists())
        };

        let mut paths: Vec<PathBuf> = serials.iter().map(|s| self.video_file(stamp, s)).collect();
        let mut attempt = 0u32;
        while taken(&paths, &self.used) {
            let suffixed = match attempt {
                0 => format!("{stamp}-{index}"),
                n => format!("{stamp}-{index}-{n}"),
            };
            paths = serials.iter().map(|s| self.video_file(&suffixed, s)).collect();
            attempt += 1;
        }

        self.used.extend(paths.iter().cloned());
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &Path) -> SessionConfig {
        SessionConfig {
            output_dir: dir.to_path_buf(),
            ..Default::default()
        }
    }

    fn serials() -> Vec<String> {
        vec!["0815-0000".to_string(), "0815-0001".to_string()]
    }

    #[test]
    fn test_stamp_shape() {
        let stamp = timestamp_now();
        assert_eq!(stamp.len(), "2020-05-14_09-30-00".len());
        assert_eq!(stamp.as_bytes()[10], b'_');
    }

    #[test]
    fn test_log_and_video_names() {
        let mut paths = SessionPaths::new(&config(Path::new("/rec")), "2020-05-14_09-30-00".into());

        assert_eq!(
            paths.log_file(),
            PathBuf::from("/rec/2020-05-14_09-30-00_rec_log.txt")
        );
        let files = paths.reserve("2020-05-14_09-30-00", 0, &serials());
        assert_eq!(
            files,
            vec![
                PathBuf::from("/rec/2020-05-14_09-30-00_0815-0000_rec.avi"),
                PathBuf::from("/rec/2020-05-14_09-30-00_0815-0001_rec.avi"),
            ]
        );
    }

    #[test]
    fn test_reused_stamp_gets_segment_suffix() {
        let mut paths = SessionPaths::new(&config(Path::new("/rec")), "s".into());

        paths.reserve("2020-05-14_09-30-00", 0, &serials());
        let second = paths.reserve("2020-05-14_09-30-00", 1, &serials());
        assert_eq!(
            second[1],
            PathBuf::from("/rec/2020-05-14_09-30-00-1_0815-0001_rec.avi")
        );

        let third = paths.reserve("2020-05-14_09-30-01", 2, &serials());
        assert_eq!(
            third[0],
            PathBuf::from("/rec/2020-05-14_09-30-01_0815-0000_rec.avi")
        );
    }

    #[test]
    fn test_existing_file_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x_0815-0001_rec.avi"), b"old").unwrap();

        let mut paths = SessionPaths::new(&config(dir.path()), "x".into());
        let files = paths.reserve("x", 3, &serials());
        assert_eq!(files[0], dir.path().join("x-3_0815-0000_rec.avi"));
    }

    #[test]
    fn test_suffixed_name_collision_keeps_counting() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x_0815-0000_rec.avi"), b"old").unwrap();
        std::fs::write(dir.path().join("x-3_0815-0001_rec.avi"), b"old").unwrap();
        std::fs::write(dir.path().join("x-3-1_0815-0000_rec.avi"), b"old").unwrap();

        let mut paths = SessionPaths::new(&config(dir.path()), "x".into());
        let files = paths.reserve("x", 3, &serials());
        assert_eq!(
            files,
            vec![
                dir.path().join("x-3-2_0815-0000_rec.avi"),
                dir.path().join("x-3-2_0815-0001_rec.avi"),
            ]
        );

        let again = paths.reserve("x", 3, &serials());
        assert_eq!(again[0], dir.path().join("x-3-3_0815-0000_rec.avi"));
    }

    #[test]
    fn test_session_subdirectory() {
        let config = SessionConfig {
            output_dir: PathBuf::from("/rec"),
            session_subdirectory: true,
            container: ".mkv".into(),
            ..Default::default()
        };
        let mut paths = SessionPaths::new(&config, "p".into());

        assert_eq!(paths.dir(), Path::new("/rec/p"));
        assert_eq!(paths.reserve("q", 0, &serials())[0], PathBuf::from("/rec/p/q_0815-0000_rec.mkv"));
    }
}
