//! Frame statistics across segments.

use std::collections::BTreeMap;
use std::time::Duration;

use camsync_ipc::{SegmentStats, SessionSummary, StopReason};

use crate::logger::human_duration;

/// Running totals of a session.
#[derive(Debug, Default)]
pub struct SessionTally {
    segments: u32,
    frame_counts: BTreeMap<String, u64>,
    recorded: Duration,
}

impl SessionTally {
    /// Empty tally.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in a closed segment.
    pub fn record(&mut self, segment: &SegmentStats) {
        self.segments += 1;
        self.recorded += Duration::from_secs_f64(segment.duration_secs.max(0.0));
        for (serial, count) in &segment.frame_counts {
            *self.frame_counts.entry(serial.clone()).or_insert(0) += count;
        }
    }

    /// Segments recorded so far.
    pub fn segments(&self) -> u32 {
        self.segments
    }

    /// Frames per serial so far.
    pub fn frame_counts(&self) -> &BTreeMap<String, u64> {
        &self.frame_counts
    }

    /// Summed recording time.
    pub fn recorded(&self) -> Duration {
        self.recorded
    }

    /// Final summary.
    pub fn summary(&self, prefix: &str, stop_reason: StopReason) -> SessionSummary {
        SessionSummary::new(
            prefix.to_string(),
            self.segments,
            self.frame_counts.clone(),
            self.recorded.as_secs_f64(),
            stop_reason,
        )
    }
}

/// `{0815-0000: 90, 0815-0001: 91}`.
pub fn format_counts(counts: &BTreeMap<String, u64>) -> String {
    let inner: Vec<String> = counts
        .iter()
        .map(|(serial, count)| format!("{serial}: {count}"))
        .collect();
    format!("{{{}}}", inner.join(", "))
}

/// The log line closing a segment or a session.
pub fn recorded_line(counts: &BTreeMap<String, u64>, secs: f64, fps: f64) -> String {
    format!(
        "Recorded {} frames in about {:.2} seconds ({}) -> about {:.2} fps.",
        format_counts(counts),
        secs,
        human_duration(secs),
        fps
    )
}
