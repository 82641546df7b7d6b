//! Reconstruction of past runs.
//!
//! Given a run record and its stored events, rebuild the view live tracking
//! would have ended with. Pure: no tracker state is read or written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use engine::WorkflowGraph;

use crate::event::RunEvent;
use crate::view::{ExecutionStatus, RunView, DEFAULT_FAILURE_MESSAGE};

/// A run as listed by the backend's run history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    /// Aggregate status as reported by the backend.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn is_success(&self) -> bool {
        matches!(self.status.as_str(), "completed" | "success" | "succeeded")
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.status.as_str(), "failed" | "error")
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.status.as_str(), "cancelled" | "canceled")
    }
}

/// Rebuild `run`'s final view from `events`.
///
/// Events belonging to other runs are skipped. A run that has not finished
/// yet is left in its in-flight state.
pub fn reconstruct_run(graph: &WorkflowGraph, run: &Run, events: &[RunEvent]) -> RunView {
    reconstruct_from(RunView::from_graph(graph), run, events)
}

pub(crate) fn reconstruct_from(mut view: RunView, run: &Run, events: &[RunEvent]) -> RunView {
    view.arm();

    let mut failure: Option<String> = None;
    for event in events.iter().filter(|e| e.run_id() == run.id) {
        match event {
            RunEvent::Step(step) => view.apply_step(
                &step.node_id,
                ExecutionStatus::from_backend(&step.status),
                step.output.clone(),
            ),
            RunEvent::Completed(done) if !done.is_success() => {
                failure = done.error.clone();
            }
            RunEvent::Completed(_) | RunEvent::Started(_) => {}
        }
    }

    if run.is_success() {
        view.complete();
    } else if run.is_failure() {
        let message = failure
            .or_else(|| run.error.clone())
            .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string());
        view.fail(&message);
    } else if run.is_cancelled() {
        view.reset();
    }

    view
}
