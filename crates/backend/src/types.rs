//! Wire types shared by the planner (which produces them) and the backend
//! client (which sends them).
//!
//! Defined here so the `engine` crate can depend on `backend` without a
//! circular dependency.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// WorkflowStep
// ---------------------------------------------------------------------------

/// Which kind of node a step executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Resource,
    Transform,
    Source,
}

/// One submittable unit of work. Recomputed on every submission, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    #[serde(rename = "type")]
    pub kind: StepKind,
    pub node_id: String,
    /// Ids of reachable executable nodes with an edge into this one.
    pub dependencies: Vec<String>,
    /// Snapshot of the node's payload at compile time.
    pub data: StepData,
}

/// Step payload, shaped per step kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepData {
    Resource(ResourceStepData),
    Transform(TransformStepData),
    Source(SourceStepData),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStepData {
    pub resource_id: String,
    pub name: String,
    pub price: f64,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    /// Inputs configured on this particular node, never on the resource.
    pub configured_inputs: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformStepData {
    pub transform_type: String,
    pub config: Value,
    /// First predecessor by edge order. Convenience only; `dependencies` is authoritative.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_node_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStepData {
    pub source_type: String,
    pub config: Value,
}

// ---------------------------------------------------------------------------
// Run creation
// ---------------------------------------------------------------------------

/// Body of the run-creation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub job_id: String,
    pub inputs: Value,
    pub steps: Vec<WorkflowStep>,
    /// Node ids grouped into levels the backend may dispatch concurrently.
    pub step_levels: Vec<Vec<String>>,
    pub workflow_inputs: Value,
}

/// `{ "run": { "id": ... } }`
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CreateRunResponse {
    pub run: CreatedRun,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CreatedRun {
    pub id: String,
}
