//! Sequential run-all over the catalog.
//!
//! Exactly one outcome is recorded per queued test; a single test failing or
//! missing its tool never aborts the rest of the sequence. A global cancel
//! (distinct from cancelling one test) drains the queue so nothing further
//! starts. Tests that need interactive disk selection are skipped here —
//! run-all is non-interactive.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::registry::Registry;
use crate::runner::{ProcessRunner, RunRequest, RunStatus};
use crate::scrollback::ScrollbackBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed,
    Cancelled,
    ToolMissing,
    /// Not started: needs interactive disk selection, or the name did not
    /// resolve.
    Skipped,
}

impl RunOutcome {
    pub fn label(self) -> &'static str {
        match self {
            RunOutcome::Completed => "Completed",
            RunOutcome::Failed => "Failed",
            RunOutcome::Cancelled => "Cancelled",
            RunOutcome::ToolMissing => "Tool Missing",
            RunOutcome::Skipped => "Skipped",
        }
    }
}

impl From<RunStatus> for RunOutcome {
    fn from(status: RunStatus) -> Self {
        match status {
            // A run still in flight has no outcome; treat it as failed if it
            // is ever recorded, which indicates a sequencing bug upstream.
            RunStatus::Running => RunOutcome::Failed,
            RunStatus::Completed { .. } => RunOutcome::Completed,
            RunStatus::Failed => RunOutcome::Failed,
            RunStatus::Cancelled => RunOutcome::Cancelled,
            RunStatus::ToolMissing => RunOutcome::ToolMissing,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub test_name: String,
    pub outcome: RunOutcome,
}

/// Queue of tests still to run plus the outcomes recorded so far. The view
/// drives it one test at a time; `run_to_completion` drives it headless.
pub struct Orchestrator {
    queue: VecDeque<String>,
    reports: Vec<RunReport>,
    cancelled: bool,
}

impl Orchestrator {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queue: names.into_iter().map(Into::into).collect(),
            reports: Vec::new(),
            cancelled: false,
        }
    }

    /// Next test to start, in catalog order. `None` once the queue is empty
    /// or a global cancel was issued.
    pub fn next_test(&mut self) -> Option<String> {
        if self.cancelled {
            return None;
        }
        self.queue.pop_front()
    }

    pub fn record(&mut self, test_name: impl Into<String>, outcome: RunOutcome) {
        self.reports.push(RunReport {
            test_name: test_name.into(),
            outcome,
        });
    }

    /// Global cancel: nothing further is started. Already-recorded reports
    /// are kept.
    pub fn cancel_remaining(&mut self) {
        self.cancelled = true;
        self.queue.clear();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn is_done(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }

    pub fn reports(&self) -> &[RunReport] {
        &self.reports
    }

    pub fn into_reports(self) -> Vec<RunReport> {
        self.reports
    }
}

/// Run every named test strictly in order, one at a time, and return one
/// report per name. Used headless and by tests; the interactive view drives
/// the same `Orchestrator` incrementally so it can render between runs.
pub async fn run_to_completion(
    runner: &mut ProcessRunner,
    registry: &Registry,
    names: Vec<String>,
    buffer: &Arc<ScrollbackBuffer>,
) -> Vec<RunReport> {
    let mut orchestrator = Orchestrator::new(names);
    while let Some(name) = orchestrator.next_test() {
        let spec = match registry.resolve(&name) {
            Ok(spec) => spec,
            Err(e) => {
                tracing::warn!("run-all: {}", e);
                orchestrator.record(name, RunOutcome::Skipped);
                continue;
            }
        };
        if spec.needs_disk() {
            buffer.append(format!("Skipping {} (requires disk selection)", spec.name));
            orchestrator.record(name, RunOutcome::Skipped);
            continue;
        }
        let request = RunRequest::from_spec(spec, registry);
        let status = match runner.start(request, Arc::clone(buffer)) {
            Ok(handle) => handle.wait().await,
            Err(e) => {
                tracing::warn!("run-all could not start {}: {}", name, e);
                orchestrator.record(name, RunOutcome::Failed);
                continue;
            }
        };
        runner.take_finished();
        orchestrator.record(name, RunOutcome::from(status));
    }
    orchestrator.into_reports()
}
