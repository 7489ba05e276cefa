//! Start/stop confirmation.

use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::error::TriggerError;
use crate::{SyncMessage, Synchroniser, TriggerResult};

/// Wait for `marker` after a start or stop command.
///
/// The next message is awaited for up to `timeout`. If it is not the
/// marker, the backlog is drained and searched. Returns the matching
/// message together with everything else that was consumed on the way.
#[instrument(skip(sync))]
pub fn expect_marker(
    sync: &mut dyn Synchroniser,
    marker: &str,
    timeout: Duration,
) -> TriggerResult<(SyncMessage, Vec<SyncMessage>)> {
    let mut skipped = Vec::new();

    if let Some(first) = sync.poll(timeout) {
        if first.contains(marker) {
            debug!("Marker confirmed");
            return Ok((first, skipped));
        }
        skipped.push(first);
    }

    let mut found = None;
    for message in sync.drain() {
        if found.is_none() && message.contains(marker) {
            found = Some(message);
        } else {
            skipped.push(message);
        }
    }

    match found {
        Some(message) => {
            debug!(skipped = skipped.len(), "Marker found in backlog");
            Ok((message, skipped))
        }
        None => {
            warn!(skipped = skipped.len(), "Marker not received");
            Err(TriggerError::HandshakeFailed {
                marker: marker.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{START_MARKER, STOP_PERMANENT_MARKER};
    use std::collections::VecDeque;

    struct Scripted {
        queue: VecDeque<SyncMessage>,
        polls: usize,
    }

    impl Scripted {
        fn new(texts: &[&str]) -> Self {
            Self {
                queue: texts.iter().map(|t| SyncMessage::now(*t)).collect(),
                polls: 0,
            }
        }
    }

    impl Synchroniser for Scripted {
        fn start(&mut self) -> TriggerResult<()> {
            Ok(())
        }

        fn stop(&mut self) -> TriggerResult<()> {
            Ok(())
        }

        fn poll(&mut self, _timeout: Duration) -> Option<SyncMessage> {
            self.polls += 1;
            self.queue.pop_front()
        }

        fn try_poll(&mut self) -> Option<SyncMessage> {
            self.queue.pop_front()
        }
    }

    #[test]
    fn test_first_message_matches() {
        let mut sync = Scripted::new(&["[START]", "later"]);
        let (msg, skipped) = expect_marker(&mut sync, START_MARKER, Duration::ZERO).unwrap();

        assert_eq!(msg.text, "[START]");
        assert!(skipped.is_empty());
        assert_eq!(sync.queue.len(), 1);
        assert_eq!(sync.polls, 1);
    }

    #[test]
    fn test_marker_found_in_backlog() {
        let mut sync = Scripted::new(&["boot", "fw 1.2", "ok [START]", "tail"]);
        let (msg, skipped) = expect_marker(&mut sync, START_MARKER, Duration::ZERO).unwrap();

        assert_eq!(msg.text, "ok [START]");
        let texts: Vec<_> = skipped.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["boot", "fw 1.2", "tail"]);
        assert!(sync.queue.is_empty());
    }

    #[test]
    fn test_missing_marker_fails() {
        let mut sync = Scripted::new(&["[START]", "noise"]);
        let err = expect_marker(&mut sync, STOP_PERMANENT_MARKER, Duration::ZERO).unwrap_err();

        match err {
            TriggerError::HandshakeFailed { marker } => assert_eq!(marker, STOP_PERMANENT_MARKER),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_inbox_fails() {
        let mut sync = Scripted::new(&[]);
        assert!(expect_marker(&mut sync, START_MARKER, Duration::ZERO).is_err());
    }
}
