// Integration tests for the process runner - real child processes, real
// log files, all four finalization paths.

use std::sync::Arc;
use std::time::{Duration, Instant};

use vitals::registry::{Registry, TestSpec};
use vitals::runner::{
    ProcessRunner, RunConfig, RunError, RunRequest, RunStatus, CANCEL_MARKER,
};
use vitals::scrollback::ScrollbackBuffer;

fn runner_with(dir: &std::path::Path, grace: Duration) -> ProcessRunner {
    ProcessRunner::new(RunConfig {
        logs_dir: dir.to_path_buf(),
        grace_period: grace,
    })
}

/// Build a request for a one-off spec through a real registry probe.
fn make_request(name: &str, argv: &[&str], bin: &str) -> RunRequest {
    let registry = Registry::with_tests(vec![TestSpec::new(name, "Test", argv, bin)]);
    let spec = registry.resolve(name).unwrap();
    RunRequest::from_spec(spec, &registry)
}

#[tokio::test]
async fn completed_run_relays_all_lines_and_mirrors_the_log() {
    let dir = tempfile::tempdir().unwrap();
    let mut runner = runner_with(dir.path(), Duration::from_secs(2));
    let buffer = Arc::new(ScrollbackBuffer::new(100));

    let request = make_request(
        "RAM Usage",
        &["sh", "-c", "printf 'Mem: 1.2G used\\nSwap: 0B used\\n'"],
        "sh",
    );
    let status = {
        let handle = runner.start(request, Arc::clone(&buffer)).unwrap();
        handle.wait().await
    };

    assert_eq!(status, RunStatus::Completed { exit_code: Some(0) });
    assert_eq!(buffer.snapshot(), vec!["Mem: 1.2G used", "Swap: 0B used"]);

    let handle = runner.take_finished().expect("run should be finished");
    assert_eq!(handle.line_count(), 2);
    let log_path = handle.log_path().expect("log should have been created");
    let log = std::fs::read_to_string(&log_path).unwrap();
    assert_eq!(log, "Mem: 1.2G used\nSwap: 0B used\n");
    let file_name = log_path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(file_name.starts_with("RAM_Usage_"), "got {}", file_name);
    assert!(file_name.ends_with(".log"));
}

#[tokio::test]
async fn missing_tool_short_circuits_without_spawning() {
    let dir = tempfile::tempdir().unwrap();
    let mut runner = runner_with(dir.path(), Duration::from_secs(2));
    let buffer = Arc::new(ScrollbackBuffer::new(100));

    let request = make_request(
        "Memtester 512M",
        &["vitals-test-no-such-tool", "512M", "1"],
        "vitals-test-no-such-tool",
    );
    assert!(!request.tool_available);

    let status = {
        let handle = runner.start(request, Arc::clone(&buffer)).unwrap();
        handle.wait().await
    };
    assert_eq!(status, RunStatus::ToolMissing);

    let lines = buffer.snapshot();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("[MISSING]"), "got {:?}", lines[0]);
    assert!(lines[0].contains("vitals-test-no-such-tool"));

    // No process ran and no log file was created.
    let handle = runner.take_finished().unwrap();
    assert_eq!(handle.log_path(), None);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn cancellation_terminates_the_child_and_appends_the_marker() {
    let dir = tempfile::tempdir().unwrap();
    let mut runner = runner_with(dir.path(), Duration::from_secs(2));
    let buffer = Arc::new(ScrollbackBuffer::new(100));

    let request = make_request(
        "CPU Stress Test (20s)",
        &["sh", "-c", "echo started; sleep 30"],
        "sh",
    );
    let started = Instant::now();
    let status = {
        let handle = runner.start(request, Arc::clone(&buffer)).unwrap();
        // Let the child produce its first line before cancelling.
        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.cancel();
        handle.wait().await
    };

    assert_eq!(status, RunStatus::Cancelled);
    assert!(
        started.elapsed() < Duration::from_secs(10),
        "cancel took {:?}",
        started.elapsed()
    );
    let lines = buffer.snapshot();
    assert_eq!(lines.first().map(String::as_str), Some("started"));
    assert_eq!(lines.last().map(String::as_str), Some(CANCEL_MARKER));

    let handle = runner.take_finished().unwrap();
    let log = std::fs::read_to_string(handle.log_path().unwrap()).unwrap();
    assert!(log.ends_with(&format!("{}\n", CANCEL_MARKER)));
}

#[tokio::test]
async fn cancellation_escalates_when_sigterm_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    // Short grace period so the test exercises the SIGKILL path quickly.
    let mut runner = runner_with(dir.path(), Duration::from_millis(300));
    let buffer = Arc::new(ScrollbackBuffer::new(100));

    let request = make_request(
        "Stubborn",
        &["sh", "-c", "trap '' TERM; echo up; sleep 30"],
        "sh",
    );
    let started = Instant::now();
    let status = {
        let handle = runner.start(request, Arc::clone(&buffer)).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.cancel();
        handle.wait().await
    };

    assert_eq!(status, RunStatus::Cancelled);
    assert!(
        started.elapsed() < Duration::from_secs(10),
        "escalation took {:?}",
        started.elapsed()
    );
    assert_eq!(buffer.last_line().as_deref(), Some(CANCEL_MARKER));
}

#[tokio::test]
async fn cancel_after_natural_exit_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let mut runner = runner_with(dir.path(), Duration::from_secs(2));
    let buffer = Arc::new(ScrollbackBuffer::new(100));

    let request = make_request("Quick", &["echo", "done"], "echo");
    let handle = runner.start(request, Arc::clone(&buffer)).unwrap();
    let status = handle.wait().await;
    assert_eq!(status, RunStatus::Completed { exit_code: Some(0) });

    handle.cancel();
    assert_eq!(handle.status(), RunStatus::Completed { exit_code: Some(0) });
    assert_eq!(buffer.last_line().as_deref(), Some("done"));
}

#[tokio::test]
async fn non_zero_exit_is_completed_with_a_trailer_line() {
    let dir = tempfile::tempdir().unwrap();
    let mut runner = runner_with(dir.path(), Duration::from_secs(2));
    let buffer = Arc::new(ScrollbackBuffer::new(100));

    let request = make_request("Exit Code", &["sh", "-c", "echo output; exit 3"], "sh");
    let status = {
        let handle = runner.start(request, Arc::clone(&buffer)).unwrap();
        handle.wait().await
    };

    assert_eq!(status, RunStatus::Completed { exit_code: Some(3) });
    let lines = buffer.snapshot();
    assert_eq!(lines[0], "output");
    assert!(
        lines[1].contains("non-zero exit code: 3"),
        "got {:?}",
        lines[1]
    );
}

#[tokio::test]
async fn stderr_is_relayed_alongside_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let mut runner = runner_with(dir.path(), Duration::from_secs(2));
    let buffer = Arc::new(ScrollbackBuffer::new(100));

    let request = make_request(
        "Both Streams",
        &["sh", "-c", "echo to-stdout; echo to-stderr 1>&2"],
        "sh",
    );
    let status = {
        let handle = runner.start(request, Arc::clone(&buffer)).unwrap();
        handle.wait().await
    };

    assert_eq!(status, RunStatus::Completed { exit_code: Some(0) });
    let lines = buffer.snapshot();
    // Relative order between the two streams is not guaranteed.
    assert_eq!(lines.len(), 2);
    assert!(lines.contains(&"to-stdout".to_string()));
    assert!(lines.contains(&"to-stderr".to_string()));
}

#[tokio::test]
async fn spawn_failure_finalizes_as_failed() {
    let dir = tempfile::tempdir().unwrap();
    let mut runner = runner_with(dir.path(), Duration::from_secs(2));
    let buffer = Arc::new(ScrollbackBuffer::new(100));

    // The availability check passed (claims true) but the binary is gone.
    let request = RunRequest {
        test_name: "Vanished".to_string(),
        argv: vec!["/nonexistent/path/to/tool".to_string()],
        required_bin: "tool".to_string(),
        tool_available: true,
    };
    let status = {
        let handle = runner.start(request, Arc::clone(&buffer)).unwrap();
        handle.wait().await
    };

    assert_eq!(status, RunStatus::Failed);
    let lines = buffer.snapshot();
    assert!(
        lines[0].starts_with("ERROR: failed to launch"),
        "got {:?}",
        lines[0]
    );
}

#[tokio::test]
async fn second_start_while_running_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut runner = runner_with(dir.path(), Duration::from_secs(2));
    let buffer = Arc::new(ScrollbackBuffer::new(100));

    let first = make_request("Long", &["sleep", "10"], "sleep");
    {
        runner.start(first, Arc::clone(&buffer)).unwrap();
    }

    let second = make_request("Quick", &["echo", "hi"], "echo");
    let err = match runner.start(second, Arc::clone(&buffer)) {
        Ok(_) => panic!("second start should be rejected"),
        Err(e) => e,
    };
    assert!(matches!(err, RunError::AlreadyRunning));

    runner.cancel_active();
    if let Some(handle) = runner.active() {
        handle.wait().await;
    }
}

#[tokio::test]
async fn unwritable_log_dir_is_not_fatal_to_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "x").unwrap();

    // logs_dir points at a regular file, so opening the session log fails.
    let mut runner = runner_with(&blocker, Duration::from_secs(2));
    let buffer = Arc::new(ScrollbackBuffer::new(100));

    let request = make_request("No Log", &["echo", "still runs"], "echo");
    let status = {
        let handle = runner.start(request, Arc::clone(&buffer)).unwrap();
        handle.wait().await
    };

    assert_eq!(status, RunStatus::Completed { exit_code: Some(0) });
    assert_eq!(buffer.snapshot(), vec!["still runs"]);

    let handle = runner.take_finished().unwrap();
    assert_eq!(handle.log_path(), None);
    assert!(handle.log_note().is_some(), "view should get a log note");
}

#[tokio::test]
async fn retention_cap_drops_only_the_oldest_lines() {
    let dir = tempfile::tempdir().unwrap();
    let mut runner = runner_with(dir.path(), Duration::from_secs(2));
    let buffer = Arc::new(ScrollbackBuffer::new(5));

    let request = make_request(
        "Chatty",
        &["sh", "-c", "for i in 1 2 3 4 5 6 7 8 9; do echo line $i; done"],
        "sh",
    );
    let status = {
        let handle = runner.start(request, Arc::clone(&buffer)).unwrap();
        handle.wait().await
    };

    assert_eq!(status, RunStatus::Completed { exit_code: Some(0) });
    assert_eq!(
        buffer.snapshot(),
        vec!["line 5", "line 6", "line 7", "line 8", "line 9"]
    );

    // The session log is unaffected by scrollback eviction.
    let handle = runner.take_finished().unwrap();
    let log = std::fs::read_to_string(handle.log_path().unwrap()).unwrap();
    assert_eq!(log.lines().count(), 9);
    assert!(log.starts_with("line 1\n"));
}
