//! Plan submission.
//!
//! `WorkflowExecutor` is the seam between the pure planner and the backend:
//! 1. Validates the graph structure.
//! 2. Compiles the plan for the selected triggers.
//! 3. Refuses to submit an empty plan.
//! 4. Posts the run request and returns the backend's run id.
//!
//! Tracking the run afterwards is the `tracker` crate's job.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use backend::RunBackend;

use crate::compiler::{compile_plan, ExecutionPlan};
use crate::configuration::missing_required_inputs;
use crate::dag::validate_graph;
use crate::{EngineError, WorkflowGraph};

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Per-submission parameters.
#[derive(Debug, Clone)]
pub struct SubmitOptions {
    /// Job the run belongs to. Chained runs share it.
    pub job_id: String,
    /// Run-level inputs.
    pub inputs: Value,
    /// Values for the workflow's declared inputs.
    pub workflow_inputs: Value,
    /// Restrict planning to these triggers. `None` = every trigger.
    pub trigger_ids: Option<Vec<String>>,
}

impl SubmitOptions {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            inputs: json!({}),
            workflow_inputs: json!({}),
            trigger_ids: None,
        }
    }

    pub fn with_inputs(mut self, inputs: Value) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_triggers(mut self, trigger_ids: Vec<String>) -> Self {
        self.trigger_ids = Some(trigger_ids);
        self
    }
}

// ---------------------------------------------------------------------------
// Output of a submission
// ---------------------------------------------------------------------------

/// A run the backend accepted.
#[derive(Debug, Clone)]
pub struct Submission {
    pub run_id: String,
    /// The plan that was sent.
    pub plan: ExecutionPlan,
}

// ---------------------------------------------------------------------------
// WorkflowExecutor
// ---------------------------------------------------------------------------

/// Stateless submitter. Cheap to clone; share one per backend.
#[derive(Clone)]
pub struct WorkflowExecutor {
    backend: Arc<dyn RunBackend>,
}

impl WorkflowExecutor {
    pub fn new(backend: Arc<dyn RunBackend>) -> Self {
        Self { backend }
    }

    /// Compile and submit.
    ///
    /// # Errors
    /// Returns `EngineError` for structural validation failures, an empty
    /// plan, or a backend failure.
    #[instrument(skip(self, graph, options), fields(job_id = %options.job_id))]
    pub async fn submit(
        &self,
        graph: &WorkflowGraph,
        options: SubmitOptions,
    ) -> Result<Submission, EngineError> {
        validate_graph(graph)?;

        let plan = compile_plan(graph, options.trigger_ids.as_deref());
        if plan.is_empty() {
            return Err(EngineError::NothingExecutable);
        }

        for step in &plan.steps {
            if let Some(node) = graph.node(&step.node_id) {
                let missing = missing_required_inputs(node);
                if !missing.is_empty() {
                    warn!(node_id = %step.node_id, ?missing, "submitting node with unset required inputs");
                }
            }
        }

        info!(
            "submitting {} steps in {} levels: {:?}",
            plan.steps.len(),
            plan.levels.len(),
            plan.levels
        );

        let request = plan.to_run_request(
            options.job_id,
            options.inputs,
            options.workflow_inputs,
        );
        let run_id = self.backend.create_run(&request).await?;

        info!(run_id = %run_id, "run created");

        Ok(Submission { run_id, plan })
    }
}
