//! The test-execution and streaming engine.
//!
//! One run moves through `Idle → Starting → Streaming → {Completing,
//! Cancelling} → Finalized`. The runner owns the child process exclusively:
//! it spawns the tool, relays stdout/stderr into the scrollback buffer from a
//! tokio task (the UI thread never touches child I/O), mirrors every line to
//! the session log, and guarantees the process and the log are released on
//! every exit path.
//!
//! Cancellation is cooperative but bounded: SIGTERM first, then a grace
//! period, then SIGKILL. A run whose tool is missing finalizes immediately
//! without spawning anything.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Local};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::watch;

use crate::registry::{Registry, TestSpec};
use crate::scrollback::ScrollbackBuffer;
use crate::session_log::SessionLog;

/// Appended as the final buffer line after a cancelled run's process is
/// confirmed dead.
pub const CANCEL_MARKER: &str = "--- Test Terminated by User ---";

/// Time allowed between SIGTERM and SIGKILL.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(2000);

/// Terminal and non-terminal states of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    /// The process exited on its own. Any exit code counts as completed;
    /// interpreting the code is left to whoever reads the log.
    Completed { exit_code: Option<i32> },
    /// The binary resolved but the launch (or wait) failed.
    Failed,
    Cancelled,
    ToolMissing,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Running)
    }

    pub fn label(self) -> &'static str {
        match self {
            RunStatus::Running => "Running",
            RunStatus::Completed { .. } => "Completed",
            RunStatus::Failed => "Failed",
            RunStatus::Cancelled => "Cancelled",
            RunStatus::ToolMissing => "Tool Missing",
        }
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("a test is already running")]
    AlreadyRunning,
}

/// Everything the runner needs to start one run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub test_name: String,
    pub argv: Vec<String>,
    pub required_bin: String,
    pub tool_available: bool,
}

impl RunRequest {
    pub fn from_spec(spec: &TestSpec, registry: &Registry) -> Self {
        Self::with_disk(spec, registry, None)
    }

    pub fn with_disk(spec: &TestSpec, registry: &Registry, disk: Option<&str>) -> Self {
        Self {
            test_name: spec.name.clone(),
            argv: spec.resolved_argv(disk),
            required_bin: spec.required_bin.clone(),
            tool_available: registry.is_available(spec),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub logs_dir: PathBuf,
    pub grace_period: Duration,
}

struct RunShared {
    test_name: String,
    started_at: DateTime<Local>,
    status: watch::Sender<RunStatus>,
    line_count: AtomicUsize,
    log_path: Mutex<Option<PathBuf>>,
    /// Non-fatal note shown by the view when the session log could not be
    /// opened.
    log_note: Mutex<Option<String>>,
}

impl RunShared {
    fn new(test_name: String, initial: RunStatus) -> Arc<Self> {
        let (status, _) = watch::channel(initial);
        Arc::new(Self {
            test_name,
            started_at: Local::now(),
            status,
            line_count: AtomicUsize::new(0),
            log_path: Mutex::new(None),
            log_note: Mutex::new(None),
        })
    }
}

/// Handle to one run. The view polls it; the orchestrator awaits it.
/// Dropping the handle mid-run closes the cancel channel, which the relay
/// task treats as a cancel, so the child never outlives the session.
pub struct RunHandle {
    shared: Arc<RunShared>,
    cancel: watch::Sender<bool>,
}

impl RunHandle {
    pub fn test_name(&self) -> &str {
        &self.shared.test_name
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.shared.started_at
    }

    pub fn status(&self) -> RunStatus {
        *self.shared.status.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn line_count(&self) -> usize {
        self.shared.line_count.load(Ordering::Relaxed)
    }

    pub fn log_path(&self) -> Option<PathBuf> {
        self.shared
            .log_path
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn log_note(&self) -> Option<String> {
        self.shared
            .log_note
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Request cancellation. A no-op once the run has finalized.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// Wait for the run to finalize and return its terminal status.
    pub async fn wait(&self) -> RunStatus {
        let mut rx = self.shared.status.subscribe();
        loop {
            let status = *rx.borrow_and_update();
            if status.is_terminal() {
                return status;
            }
            if rx.changed().await.is_err() {
                return *rx.borrow();
            }
        }
    }
}

/// Owns the single active run. At most one process is ever Streaming.
pub struct ProcessRunner {
    config: RunConfig,
    active: Option<RunHandle>,
}

impl ProcessRunner {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            active: None,
        }
    }

    pub fn active(&self) -> Option<&RunHandle> {
        self.active.as_ref()
    }

    /// Remove and return the active handle once its run has finalized.
    pub fn take_finished(&mut self) -> Option<RunHandle> {
        if self.active.as_ref().is_some_and(|h| h.is_finished()) {
            self.active.take()
        } else {
            None
        }
    }

    pub fn cancel_active(&self) {
        if let Some(handle) = &self.active {
            handle.cancel();
        }
    }

    /// Start one run. Fails if a run is still active. A missing tool
    /// finalizes immediately: no process, no log file, an indicator line in
    /// the buffer.
    pub fn start(
        &mut self,
        request: RunRequest,
        buffer: Arc<ScrollbackBuffer>,
    ) -> Result<&RunHandle, RunError> {
        if self.active.as_ref().is_some_and(|h| !h.is_finished()) {
            return Err(RunError::AlreadyRunning);
        }
        self.active = None;

        let (cancel, cancel_rx) = watch::channel(false);

        if !request.tool_available {
            let shared = RunShared::new(request.test_name.clone(), RunStatus::ToolMissing);
            let line = format!(
                "[MISSING] required tool '{}' was not found in PATH",
                request.required_bin
            );
            shared.line_count.fetch_add(1, Ordering::Relaxed);
            buffer.append(line);
            tracing::info!(test = %request.test_name, tool = %request.required_bin, "tool missing, run short-circuited");
            return Ok(self.active.insert(RunHandle { shared, cancel }));
        }

        let shared = RunShared::new(request.test_name.clone(), RunStatus::Running);
        tokio::spawn(run_task(
            request,
            Arc::clone(&shared),
            buffer,
            cancel_rx,
            self.config.clone(),
        ));
        Ok(self.active.insert(RunHandle { shared, cancel }))
    }
}

/// Reassembles arbitrary read chunks into complete lines. Input is not
/// necessarily line-aligned; a trailing fragment is held until the next
/// newline or flushed at EOF. Trailing `\r` is stripped.
#[derive(Default)]
pub struct LineAssembler {
    partial: Vec<u8>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(chunk);
        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(rel) = self.partial[start..].iter().position(|&b| b == b'\n') {
            let end = start + rel;
            lines.push(to_line(&self.partial[start..end]));
            start = end + 1;
        }
        self.partial.drain(..start);
        lines
    }

    /// The unterminated tail, if any. Empties the assembler.
    pub fn take_remainder(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            return None;
        }
        let line = to_line(&self.partial);
        self.partial.clear();
        Some(line)
    }
}

fn to_line(bytes: &[u8]) -> String {
    let bytes = match bytes.last() {
        Some(b'\r') => &bytes[..bytes.len() - 1],
        _ => bytes,
    };
    String::from_utf8_lossy(bytes).into_owned()
}

fn emit(
    shared: &RunShared,
    buffer: &ScrollbackBuffer,
    log: &mut Option<SessionLog>,
    line: String,
) {
    if let Some(log) = log {
        log.write_line(&line);
    }
    shared.line_count.fetch_add(1, Ordering::Relaxed);
    buffer.append(line);
}

async fn run_task(
    request: RunRequest,
    shared: Arc<RunShared>,
    buffer: Arc<ScrollbackBuffer>,
    mut cancel_rx: watch::Receiver<bool>,
    config: RunConfig,
) {
    let mut log = match SessionLog::open(&request.test_name, shared.started_at, &config.logs_dir) {
        Ok(log) => {
            *shared.log_path.lock().unwrap_or_else(|e| e.into_inner()) =
                Some(log.path().to_path_buf());
            Some(log)
        }
        Err(e) => {
            tracing::warn!("session log unavailable: {}", e);
            *shared.log_note.lock().unwrap_or_else(|e| e.into_inner()) =
                Some(format!("log not saved: {}", e.source));
            None
        }
    };

    let Some((program, args)) = request.argv.split_first() else {
        emit(
            &shared,
            &buffer,
            &mut log,
            "ERROR: empty command for this test".to_string(),
        );
        finalize(&shared, log, RunStatus::Failed);
        return;
    };
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            emit(
                &shared,
                &buffer,
                &mut log,
                format!("ERROR: failed to launch '{}': {}", program, e),
            );
            finalize(&shared, log, RunStatus::Failed);
            return;
        }
    };
    tracing::debug!(test = %request.test_name, pid = ?child.id(), "process spawned");

    let (mut stdout, mut stderr) = match (child.stdout.take(), child.stderr.take()) {
        (Some(out), Some(err)) => (out, err),
        _ => {
            emit(
                &shared,
                &buffer,
                &mut log,
                "ERROR: failed to capture process output".to_string(),
            );
            let _ = child.kill().await;
            finalize(&shared, log, RunStatus::Failed);
            return;
        }
    };

    let mut out_lines = LineAssembler::new();
    let mut err_lines = LineAssembler::new();
    let mut out_buf = vec![0u8; 8192];
    let mut err_buf = vec![0u8; 8192];
    let mut out_open = true;
    let mut err_open = true;
    let mut cancelled = false;

    while (out_open || err_open) && !cancelled {
        tokio::select! {
            read = stdout.read(&mut out_buf), if out_open => match read {
                Ok(0) => out_open = false,
                Ok(n) => {
                    for line in out_lines.feed(&out_buf[..n]) {
                        emit(&shared, &buffer, &mut log, line);
                    }
                }
                Err(e) => {
                    tracing::debug!("stdout read error: {}", e);
                    out_open = false;
                }
            },
            read = stderr.read(&mut err_buf), if err_open => match read {
                Ok(0) => err_open = false,
                Ok(n) => {
                    for line in err_lines.feed(&err_buf[..n]) {
                        emit(&shared, &buffer, &mut log, line);
                    }
                }
                Err(e) => {
                    tracing::debug!("stderr read error: {}", e);
                    err_open = false;
                }
            },
            changed = cancel_rx.changed() => match changed {
                Ok(()) => {
                    if *cancel_rx.borrow() {
                        cancelled = true;
                    }
                }
                // The handle is gone; treat it as a cancel so the child
                // never outlives the session.
                Err(_) => cancelled = true,
            },
        }
    }

    if cancelled {
        terminate(&mut child, config.grace_period).await;
        if let Some(tail) = out_lines.take_remainder() {
            emit(&shared, &buffer, &mut log, tail);
        }
        if let Some(tail) = err_lines.take_remainder() {
            emit(&shared, &buffer, &mut log, tail);
        }
        emit(&shared, &buffer, &mut log, CANCEL_MARKER.to_string());
        finalize(&shared, log, RunStatus::Cancelled);
        return;
    }

    if let Some(tail) = out_lines.take_remainder() {
        emit(&shared, &buffer, &mut log, tail);
    }
    if let Some(tail) = err_lines.take_remainder() {
        emit(&shared, &buffer, &mut log, tail);
    }

    match child.wait().await {
        Ok(status) => {
            if let Some(code) = status.code() {
                if code != 0 {
                    emit(
                        &shared,
                        &buffer,
                        &mut log,
                        format!("*** Command finished with non-zero exit code: {} ***", code),
                    );
                }
            }
            finalize(&shared, log, RunStatus::Completed { exit_code: status.code() });
        }
        Err(e) => {
            emit(
                &shared,
                &buffer,
                &mut log,
                format!("ERROR: failed to collect process status: {}", e),
            );
            finalize(&shared, log, RunStatus::Failed);
        }
    }
}

/// SIGTERM, wait out the grace period, SIGKILL if the process is still up.
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            tracing::debug!("SIGTERM failed: {}", e);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(_) => {}
        Err(_) => {
            tracing::debug!("process survived the grace period, sending SIGKILL");
            if let Err(e) = child.kill().await {
                tracing::debug!("SIGKILL failed: {}", e);
            }
        }
    }
}

fn finalize(shared: &RunShared, log: Option<SessionLog>, status: RunStatus) {
    if let Some(log) = log {
        log.close();
    }
    // send_replace publishes even when nobody holds a receiver; the view
    // only polls through `RunHandle::status`.
    shared.status.send_replace(status);
    tracing::debug!(test = %shared.test_name, status = status.label(), "run finalized");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembler_splits_multi_line_chunks() {
        let mut asm = LineAssembler::new();
        assert_eq!(asm.feed(b"Mem: 1G\nSwap: 0B\n"), vec!["Mem: 1G", "Swap: 0B"]);
        assert_eq!(asm.take_remainder(), None);
    }

    #[test]
    fn assembler_holds_partial_lines_across_chunks() {
        let mut asm = LineAssembler::new();
        assert!(asm.feed(b"Mem: ").is_empty());
        assert_eq!(asm.feed(b"1G\nSw"), vec!["Mem: 1G"]);
        assert_eq!(asm.feed(b"ap: 0B"), Vec::<String>::new());
        assert_eq!(asm.take_remainder(), Some("Swap: 0B".to_string()));
        assert_eq!(asm.take_remainder(), None);
    }

    #[test]
    fn assembler_strips_carriage_returns() {
        let mut asm = LineAssembler::new();
        assert_eq!(asm.feed(b"one\r\ntwo\r\n"), vec!["one", "two"]);
    }

    #[test]
    fn assembler_handles_empty_lines() {
        let mut asm = LineAssembler::new();
        assert_eq!(asm.feed(b"a\n\nb\n"), vec!["a", "", "b"]);
    }

    #[test]
    fn assembler_is_lossy_on_invalid_utf8() {
        let mut asm = LineAssembler::new();
        let lines = asm.feed(b"ok \xff\xfe bytes\n");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("ok "));
    }

    #[test]
    fn status_terminality() {
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed { exit_code: Some(0) }.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(RunStatus::ToolMissing.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
    }
}
