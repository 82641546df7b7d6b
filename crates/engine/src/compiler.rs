//! Step compilation: turns levelled nodes into submittable [`WorkflowStep`]s.
//!
//! [`compile_plan`] is a pure function of the graph: same nodes and edges in,
//! same plan out. It never mutates the graph, so two resource nodes pointing
//! at one resource definition cannot leak configuration into each other.

use std::collections::HashSet;

use backend::{
    ResourceStepData, RunRequest, SourceStepData, StepData, StepKind, TransformStepData,
    WorkflowStep,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::dag::{execution_levels, reachable_nodes};
use crate::models::{Node, NodeKind, WorkflowGraph};

/// Everything the planner derives from a graph for one submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionPlan {
    /// One step per executable node, in level order.
    pub steps: Vec<WorkflowStep>,
    /// Node ids grouped into levels the backend may run concurrently.
    pub levels: Vec<Vec<String>>,
    /// Reachable nodes left out because they sit on a cycle.
    pub dropped: Vec<String>,
}

impl ExecutionPlan {
    /// No step to run. Callers decide whether that is an error.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Wrap the plan in the run-creation request body.
    pub fn to_run_request(
        &self,
        job_id: impl Into<String>,
        inputs: Value,
        workflow_inputs: Value,
    ) -> RunRequest {
        RunRequest {
            job_id: job_id.into(),
            inputs,
            steps: self.steps.clone(),
            step_levels: self.levels.clone(),
            workflow_inputs,
        }
    }
}

/// Compile the plan for everything reachable from `trigger_ids` (all triggers
/// when `None`).
pub fn compile_plan(graph: &WorkflowGraph, trigger_ids: Option<&[String]>) -> ExecutionPlan {
    let reachable = reachable_nodes(graph, trigger_ids);
    let leveled = execution_levels(graph, &reachable);

    if !leveled.dropped.is_empty() {
        warn!(
            dropped = ?leveled.dropped,
            "cyclic nodes excluded from the execution plan"
        );
    }

    let index = graph.index();
    let steps: Vec<WorkflowStep> = leveled
        .levels
        .iter()
        .flatten()
        .filter_map(|id| index.get(id.as_str()))
        .filter_map(|node| compile_step(graph, &reachable, node))
        .collect();

    debug!(
        steps = steps.len(),
        levels = leveled.levels.len(),
        "execution plan compiled"
    );

    ExecutionPlan {
        steps,
        levels: leveled.levels,
        dropped: leveled.dropped,
    }
}

/// Sources of incoming edges that are themselves reachable and executable.
///
/// Edges from triggers never count: triggers are virtual roots and are never
/// in the reachable set.
pub fn dependencies(graph: &WorkflowGraph, reachable: &HashSet<&str>, node_id: &str) -> Vec<String> {
    let mut seen: HashSet<&str> = HashSet::new();
    graph
        .incoming(node_id)
        .map(|e| e.source.as_str())
        .filter(|source| reachable.contains(source) && seen.insert(*source))
        .map(str::to_owned)
        .collect()
}

fn compile_step(graph: &WorkflowGraph, reachable: &HashSet<&str>, node: &Node) -> Option<WorkflowStep> {
    let (kind, data) = match node.kind {
        NodeKind::Resource => {
            let resource = node.data.resource.as_ref()?;
            let data = StepData::Resource(ResourceStepData {
                resource_id: resource.id.clone(),
                name: resource.name.clone(),
                price: resource.price,
                url: resource.url.clone(),
                network: resource.network.clone(),
                configured_inputs: node.data.configured_inputs.clone(),
            });
            (StepKind::Resource, data)
        }
        NodeKind::Transform => {
            let data = StepData::Transform(TransformStepData {
                transform_type: node.data.transform_type.clone().unwrap_or_default(),
                config: node.data.config.clone(),
                source_node_id: graph.incoming(&node.id).next().map(|e| e.source.clone()),
            });
            (StepKind::Transform, data)
        }
        NodeKind::Source => {
            let data = StepData::Source(SourceStepData {
                source_type: node.data.source_type.clone().unwrap_or_default(),
                config: node.data.config.clone(),
            });
            (StepKind::Source, data)
        }
        NodeKind::Trigger | NodeKind::Output => return None,
    };

    Some(WorkflowStep {
        kind,
        node_id: node.id.clone(),
        dependencies: dependencies(graph, reachable, &node.id),
        data,
    })
}
