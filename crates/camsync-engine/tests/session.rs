mod common;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use camsync_capture::EmulatedBackend;
use camsync_engine::{RecorderError, SessionSupervisor};
use camsync_ipc::{RecorderEvent, RetrievalTimeoutPolicy, SegmentStats, SessionState, StopReason};
use camsync_trigger::TriggerError;

use common::{file_name, free_run_config, stop_after, synchronised_config, RecordingSinkFactory, Rig};

fn assert_contiguous(sequences: &[u64]) {
    assert!(!sequences.is_empty());
    let expected: Vec<u64> = (0..sequences.len() as u64).collect();
    assert_eq!(sequences, expected.as_slice());
}

fn log_file_in(dir: &Path) -> PathBuf {
    fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .find(|path| file_name(path).ends_with("_rec_log.txt"))
        .expect("session log")
}

fn wait_for_running(state: &Arc<RwLock<SessionState>>) {
    for _ in 0..500 {
        if state.read().is_running() {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("session never reached Running");
}

#[test]
fn test_free_run_session_records_every_camera() {
    let dir = tempfile::tempdir().unwrap();
    let rig = Rig::new(EmulatedBackend::new(2));
    let (events_tx, events_rx) = crossbeam_channel::unbounded();

    let supervisor = SessionSupervisor::new(free_run_config(dir.path()), rig.backends()).with_events(events_tx);
    let stopper = stop_after(supervisor.stop_token(), Duration::from_millis(1_500));
    let summary = supervisor.run().unwrap();
    stopper.join().unwrap();

    assert_eq!(summary.segments, 1);
    assert_eq!(summary.stop_reason, StopReason::OperatorRequested);
    for serial in ["0815-0000", "0815-0001"] {
        let count = summary.frame_counts[serial];
        assert!((20..=50).contains(&count), "{serial}: {count} frames");
        let sequences = rig.sinks.sequences_for(serial);
        assert_eq!(sequences.len() as u64, count);
        assert_contiguous(&sequences);
    }
    assert!(summary.average_fps > 15.0 && summary.average_fps < 35.0);
    assert_eq!(rig.cameras.open_devices(), 0);

    {
        let journal = rig.sinks.journal();
        let names: Vec<String> = journal.specs.iter().map(|s| file_name(&s.path)).collect();
        assert_eq!(names, ["session_0815-0000_rec.avi", "session_0815-0001_rec.avi"]);
        assert!(journal.specs.iter().all(|s| s.frame_rate == 30.0));
        assert_eq!(journal.closed.len(), 2);
        assert!(journal.aborted.is_empty());
    }

    let text = fs::read_to_string(dir.path().join("session_rec_log.txt")).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "session");
    assert!(lines.contains(&"Found camera 0815-0000 (Emulation)."));
    assert!(lines.contains(&"Settings:"));
    assert!(lines.iter().any(|l| l.ends_with(" - Started recording with 2 cameras.")));
    assert!(lines.iter().any(|l| l.ends_with(" - Stopped recording.")));
    assert_eq!(lines[lines.len() - 2], "");
    assert!(lines[lines.len() - 1].starts_with("Recorded {0815-0000: "));
    assert_eq!(lines.iter().filter(|l| l.starts_with("Recorded ")).count(), 1);

    let states: Vec<String> = events_rx
        .try_iter()
        .filter_map(|event| match event {
            RecorderEvent::StateChanged { current, .. } => Some(current.name().to_string()),
            _ => None,
        })
        .collect();
    assert_eq!(
        states.first().map(String::as_str),
        Some(SessionState::Enumerating.name())
    );
    assert_eq!(states.last().map(String::as_str), Some(SessionState::Stopped.name()));
    assert!(states.iter().any(|s| s == SessionState::Running { segment: 0 }.name()));
}

#[test]
fn test_no_camera_creates_no_files() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let rig = Rig::new(EmulatedBackend::new(0));
    let (events_tx, events_rx) = crossbeam_channel::unbounded();

    let result = SessionSupervisor::new(free_run_config(&out), rig.backends())
        .with_events(events_tx)
        .run();

    assert!(matches!(result, Err(RecorderError::DeviceNotFound)));
    assert!(!out.exists());
    assert!(rig.sinks.journal().specs.is_empty());

    let events: Vec<RecorderEvent> = events_rx.try_iter().collect();
    assert!(events
        .iter()
        .any(|e| matches!(e, RecorderEvent::Error { fatal: true, message } if message == "Cannot start: no camera found")));
    assert!(events
        .iter()
        .any(|e| matches!(e, RecorderEvent::StateChanged { current, .. } if current.is_stopped())));
    match events.last() {
        Some(RecorderEvent::SessionFinished(summary)) => {
            assert_eq!(summary.segments, 0);
            assert!(summary.stop_reason.is_error());
        }
        other => panic!("unexpected last event: {other:?}"),
    }
}

#[test]
fn test_camera_limit_and_session_subdirectory() {
    let dir = tempfile::tempdir().unwrap();
    let rig = Rig::new(EmulatedBackend::new(4));
    let mut config = free_run_config(dir.path());
    config.max_cameras = 2;
    config.session_subdirectory = true;

    let supervisor = SessionSupervisor::new(config, rig.backends());
    let stopper = stop_after(supervisor.stop_token(), Duration::from_millis(300));
    let summary = supervisor.run().unwrap();
    stopper.join().unwrap();

    assert_eq!(summary.frame_counts.len(), 2);
    assert_eq!(rig.cameras.opened_total(), 2);
    assert!(dir.path().join("session").join("session_rec_log.txt").exists());
    assert!(rig
        .sinks
        .journal()
        .specs
        .iter()
        .all(|s| s.path.parent() == Some(dir.path().join("session").as_path())));
}

#[test]
fn test_rollover_requests_open_new_segments() {
    let dir = tempfile::tempdir().unwrap();
    let rig = Rig::synchronised(EmulatedBackend::new(2), |factory| factory);
    let injector = rig.synchronisers.injector();
    let state = Arc::new(RwLock::new(SessionState::Idle));

    let (events_tx, events_rx) = crossbeam_channel::unbounded();

    let supervisor = SessionSupervisor::new(synchronised_config(dir.path(), 50.0), rig.backends())
        .with_state(Arc::clone(&state))
        .with_events(events_tx);
    let stop = supervisor.stop_token();
    let session = thread::spawn(move || supervisor.run());

    wait_for_running(&state);
    thread::sleep(Duration::from_millis(300));
    assert!(injector.inject("[STOP_ROLLOVER]"));
    thread::sleep(Duration::from_millis(300));
    assert!(injector.inject("[STOP_ROLLOVER]"));
    thread::sleep(Duration::from_millis(300));
    stop.cancel();

    let summary = session.join().unwrap().unwrap();
    assert_eq!(summary.segments, 3);
    assert_eq!(rig.synchronisers.connections(), 1);
    assert_eq!(rig.cameras.opened_total(), 6);
    assert_eq!(rig.cameras.open_devices(), 0);

    for serial in ["0815-0000", "0815-0001"] {
        let sequences = rig.sinks.sequences_for(serial);
        assert_eq!(sequences.len() as u64, summary.frame_counts[serial]);
        assert_contiguous(&sequences);
    }

    let segments: Vec<SegmentStats> = events_rx
        .try_iter()
        .filter_map(|event| match event {
            RecorderEvent::SegmentCompleted(stats) => Some(stats),
            _ => None,
        })
        .collect();
    assert_eq!(segments.len(), 3);
    assert_eq!(segments.iter().map(|s| s.index).collect::<Vec<_>>(), [0, 1, 2]);

    let journal = rig.sinks.journal();
    for serial in ["0815-0000", "0815-0001"] {
        let mut previous_last: Option<u64> = None;
        for stats in &segments {
            let file = stats
                .files
                .iter()
                .find(|f| file_name(f).contains(serial))
                .expect("segment file");
            let written = &journal.frames[file];
            assert!(!written.is_empty(), "segment {} of {serial} is empty", stats.index);
            assert_eq!(stats.frame_counts[serial], written.len() as u64);
            if let Some(last) = previous_last {
                assert_eq!(written[0], last + 1, "gap before segment {} of {serial}", stats.index);
            }
            previous_last = written.last().copied();
        }
    }

    assert_eq!(journal.specs.len(), 6);
    let unique: HashSet<&PathBuf> = journal.specs.iter().map(|s| &s.path).collect();
    assert_eq!(unique.len(), 6);
    assert!(journal.specs.iter().all(|s| s.frame_rate == 50.0));

    let text = fs::read_to_string(log_file_in(dir.path())).unwrap();
    assert_eq!(text.matches("Recording rollover...").count(), 2);
    assert_eq!(text.matches("Started recording with 2 cameras.").count(), 3);
}

#[test]
fn test_automatic_rollover() {
    let dir = tempfile::tempdir().unwrap();
    let rig = Rig::synchronised(EmulatedBackend::new(1), |factory| {
        factory.with_rollover_every(Duration::from_millis(250))
    });

    let supervisor = SessionSupervisor::new(synchronised_config(dir.path(), 40.0), rig.backends());
    let stopper = stop_after(supervisor.stop_token(), Duration::from_millis(1_200));
    let summary = supervisor.run().unwrap();
    stopper.join().unwrap();

    assert!(summary.segments >= 3, "{} segments", summary.segments);
    assert_contiguous(&rig.sinks.sequences_for("0815-0000"));
}

#[test]
fn test_silent_synchroniser_fails_handshake() {
    let dir = tempfile::tempdir().unwrap();
    let rig = Rig::synchronised(EmulatedBackend::new(2), |factory| factory.silent());
    let mut config = synchronised_config(dir.path(), 30.0);
    if let Some(sync) = config.synchroniser.as_mut() {
        sync.handshake_timeout_ms = 200;
    }

    let result = SessionSupervisor::new(config, rig.backends()).run();

    match result {
        Err(RecorderError::SynchroniserHandshakeFailed { marker }) => assert_eq!(marker, "[START]"),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(rig.cameras.open_devices(), 0);

    let text = fs::read_to_string(log_file_in(dir.path())).unwrap();
    assert!(text.contains("Error: Problem with the synchroniser: no [START] confirmation"));
    assert!(text.contains("Stopped recording."));
}

#[test]
fn test_stalled_camera_aborts_session() {
    let dir = tempfile::tempdir().unwrap();
    let rig = Rig::new(EmulatedBackend::new(2).stall_after("0815-0001", 5));
    let (events_tx, events_rx) = crossbeam_channel::unbounded();

    let result = SessionSupervisor::new(free_run_config(dir.path()), rig.backends())
        .with_events(events_tx)
        .run();

    match result {
        Err(RecorderError::ChannelRetrievalTimeout { serial, timeout }) => {
            assert_eq!(serial, "0815-0001");
            assert_eq!(timeout, Duration::from_millis(200));
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(rig.cameras.open_devices(), 0);
    assert_eq!(rig.sinks.journal().closed.len(), 2);
    assert_eq!(rig.sinks.sequences_for("0815-0001").len(), 5);

    let finished = events_rx.try_iter().find_map(|event| match event {
        RecorderEvent::SessionFinished(summary) => Some(summary),
        _ => None,
    });
    let summary = finished.expect("SessionFinished event");
    assert!(matches!(
        summary.stop_reason,
        StopReason::ChannelFailed { ref serial, .. } if serial == "0815-0001"
    ));
    assert_eq!(summary.frame_counts["0815-0001"], 5);
}

#[test]
fn test_stalled_camera_restarts_segment() {
    let dir = tempfile::tempdir().unwrap();
    let rig = Rig::new(EmulatedBackend::new(2).stall_after("0815-0001", 10));
    let mut config = free_run_config(dir.path());
    config.retrieval_timeout_policy = RetrievalTimeoutPolicy::RestartSegment;

    let supervisor = SessionSupervisor::new(config, rig.backends());
    let stopper = stop_after(supervisor.stop_token(), Duration::from_millis(1_500));
    let summary = supervisor.run().unwrap();
    stopper.join().unwrap();

    assert!(summary.segments >= 2, "{} segments", summary.segments);
    assert_eq!(rig.cameras.open_devices(), 0);
    assert_contiguous(&rig.sinks.sequences_for("0815-0000"));

    let journal = rig.sinks.journal();
    assert_eq!(file_name(&journal.specs[0].path), "session_0815-0000_rec.avi");
    assert_eq!(file_name(&journal.specs[2].path), "session-1_0815-0000_rec.avi");
    assert_eq!(file_name(&journal.specs[3].path), "session-1_0815-0001_rec.avi");

    let text = fs::read_to_string(dir.path().join("session_rec_log.txt")).unwrap();
    assert!(text.contains("Camera 0815-0001 stopped delivering frames, restarting segment..."));
}

#[test]
fn test_ignored_timeouts_keep_recording() {
    let dir = tempfile::tempdir().unwrap();
    let rig = Rig::new(EmulatedBackend::new(2).stall_after("0815-0001", 5));
    let mut config = free_run_config(dir.path());
    config.retrieval_timeout_policy = RetrievalTimeoutPolicy::Ignore;

    let supervisor = SessionSupervisor::new(config, rig.backends());
    let stopper = stop_after(supervisor.stop_token(), Duration::from_millis(800));
    let summary = supervisor.run().unwrap();
    stopper.join().unwrap();

    assert_eq!(summary.segments, 1);
    assert_eq!(summary.frame_counts["0815-0001"], 5);
    assert!(summary.frame_counts["0815-0000"] > 5);
}

#[test]
fn test_sink_failure_aborts_opened_sinks() {
    let dir = tempfile::tempdir().unwrap();
    let rig = Rig::with_sinks(
        EmulatedBackend::new(2),
        RecordingSinkFactory::failing_for("0815-0001"),
    );

    let result = SessionSupervisor::new(free_run_config(dir.path()), rig.backends()).run();

    match result {
        Err(RecorderError::SinkOpen { serial, .. }) => assert_eq!(serial, "0815-0001"),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(rig.cameras.opened_total(), 2);
    assert_eq!(rig.cameras.open_devices(), 0);

    let journal = rig.sinks.journal();
    assert_eq!(journal.aborted.len(), 1);
    assert_eq!(file_name(&journal.aborted[0]), "session_0815-0000_rec.avi");
    assert!(journal.closed.is_empty());
}

#[test]
fn test_rejected_settings_abort_segment_start() {
    let dir = tempfile::tempdir().unwrap();
    let rig = Rig::new(EmulatedBackend::new(3).reject_settings("0815-0002"));

    let result = SessionSupervisor::new(free_run_config(dir.path()), rig.backends()).run();

    match result {
        Err(RecorderError::DeviceSettings { serial, .. }) => assert_eq!(serial, "0815-0002"),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(rig.cameras.open_devices(), 0);
    assert_eq!(rig.sinks.journal().aborted.len(), 2);

    let text = fs::read_to_string(dir.path().join("session_rec_log.txt")).unwrap();
    assert!(text.contains("Error: Camera 0815-0002 settings failed"));
}

#[test]
fn test_panicking_sink_ends_session() {
    let dir = tempfile::tempdir().unwrap();
    let rig = Rig::with_sinks(
        EmulatedBackend::new(2),
        RecordingSinkFactory::panicking_for("0815-0001", 3),
    );

    let supervisor = SessionSupervisor::new(free_run_config(dir.path()), rig.backends());
    let stopper = stop_after(supervisor.stop_token(), Duration::from_secs(3));
    let started = Instant::now();
    let result = supervisor.run();
    let elapsed = started.elapsed();
    stopper.join().unwrap();

    match result {
        Err(RecorderError::ChannelFailed { serial, message }) => {
            assert_eq!(serial, "0815-0001");
            assert_eq!(message, "capture thread panicked");
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(elapsed < Duration::from_millis(1_500), "session ran for {elapsed:?}");
    assert_eq!(rig.sinks.sequences_for("0815-0001").len(), 3);

    let journal = rig.sinks.journal();
    assert_eq!(journal.closed.len(), 1);
    assert_eq!(file_name(&journal.closed[0]), "session_0815-0000_rec.avi");

    let text = fs::read_to_string(dir.path().join("session_rec_log.txt")).unwrap();
    assert!(text.contains("Error: Camera 0815-0001 failed: capture thread panicked"));
}

#[test]
fn test_lost_synchroniser_ends_session() {
    let dir = tempfile::tempdir().unwrap();
    let rig = Rig::synchronised(EmulatedBackend::new(2), |factory| factory);
    let injector = rig.synchronisers.injector();
    let state = Arc::new(RwLock::new(SessionState::Idle));
    let mut config = synchronised_config(dir.path(), 50.0);
    config.retrieval_timeout_policy = RetrievalTimeoutPolicy::Ignore;

    let supervisor = SessionSupervisor::new(config, rig.backends()).with_state(Arc::clone(&state));
    let stopper = stop_after(supervisor.stop_token(), Duration::from_secs(5));
    let session = thread::spawn(move || supervisor.run());

    wait_for_running(&state);
    thread::sleep(Duration::from_millis(200));
    let lost_at = Instant::now();
    injector.disconnect();

    let result = session.join().unwrap();
    assert!(lost_at.elapsed() < Duration::from_secs(2), "no reaction for {:?}", lost_at.elapsed());
    stopper.join().unwrap();

    match result {
        Err(RecorderError::SynchroniserLost { source }) => {
            assert!(matches!(source, TriggerError::Disconnected));
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(state.read().is_stopped());
    assert_eq!(rig.cameras.open_devices(), 0);
    assert_eq!(rig.sinks.journal().closed.len(), 2);

    let text = fs::read_to_string(log_file_in(dir.path())).unwrap();
    assert!(text.contains("Error: Lost the synchroniser: Synchroniser disconnected"));
    assert!(text.contains("Synchroniser did not confirm stop."));
    assert!(text.contains("Stopped recording."));
}
