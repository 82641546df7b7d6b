//! Per-node run state, and the transitions a run drives it through.
//!
//! A [`RunView`] is built once from the graph and then mutated only by the
//! tracker (or by history reconstruction, on its own copy).

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use serde_json::{Map, Value};

use engine::{NodeKind, WorkflowGraph};

/// Shown on output nodes that a successful run never wrote to.
pub const NO_OUTPUT_MESSAGE: &str = "Completed, no output";

/// Shown on output nodes of a failed run when the backend gave no reason.
pub const DEFAULT_FAILURE_MESSAGE: &str = "Execution failed";

/// Status of one executable node.
///
/// `Idle → Pending → Running → Completed | Failed → Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    #[default]
    Idle,
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    /// Map a backend step status onto the local enum. Unknown values count
    /// as pending.
    pub fn from_backend(status: &str) -> Self {
        match status {
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "running" => Self::Running,
            _ => Self::Pending,
        }
    }
}

/// What an output node currently shows.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum OutputDisplay {
    #[default]
    Idle,
    /// Waiting on upstream steps.
    Loading,
    /// Upstream output, raw or merged.
    Ready(Value),
    /// The run failed before anything reached this node.
    Error(String),
    /// The run succeeded without writing to this node.
    NoOutput,
}

impl OutputDisplay {
    pub fn has_result(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

/// State of a resource, transform or source node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeRunState {
    #[serde(skip)]
    pub kind: NodeKind,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

/// State of an output node.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OutputRunState {
    pub display: OutputDisplay,
    /// Output recorded per upstream node id.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub sources: BTreeMap<String, Value>,
}

impl OutputRunState {
    /// One source shows its raw value; several are merged into an object
    /// keyed by source node id.
    fn refresh(&mut self) {
        self.display = match self.sources.len() {
            0 => return,
            1 => match self.sources.values().next() {
                Some(value) => OutputDisplay::Ready(value.clone()),
                None => return,
            },
            _ => {
                let merged: Map<String, Value> = self
                    .sources
                    .iter()
                    .map(|(id, value)| (id.clone(), value.clone()))
                    .collect();
                OutputDisplay::Ready(Value::Object(merged))
            }
        };
    }
}

/// Status and output of every node in one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunView {
    pub nodes: BTreeMap<String, NodeRunState>,
    pub outputs: BTreeMap<String, OutputRunState>,
    /// Producer id → output nodes it has an edge into.
    #[serde(skip)]
    feeds: HashMap<String, Vec<String>>,
}

impl RunView {
    /// Idle view over every non-trigger node in `graph`.
    pub fn from_graph(graph: &WorkflowGraph) -> Self {
        let mut view = Self::default();
        for node in &graph.nodes {
            match node.kind {
                NodeKind::Trigger => {}
                NodeKind::Output => {
                    view.outputs.entry(node.id.clone()).or_default();
                }
                kind => {
                    view.nodes.entry(node.id.clone()).or_insert(NodeRunState {
                        kind,
                        status: ExecutionStatus::Idle,
                        output: None,
                    });
                }
            }
        }
        for edge in &graph.edges {
            if !view.outputs.contains_key(&edge.target) {
                continue;
            }
            let targets = view.feeds.entry(edge.source.clone()).or_default();
            if !targets.contains(&edge.target) {
                targets.push(edge.target.clone());
            }
        }
        view
    }

    pub fn status(&self, node_id: &str) -> Option<ExecutionStatus> {
        self.nodes.get(node_id).map(|n| n.status)
    }

    pub fn display(&self, output_id: &str) -> Option<&OutputDisplay> {
        self.outputs.get(output_id).map(|o| &o.display)
    }

    /// The value an output node shows, if any.
    pub fn output_value(&self, output_id: &str) -> Option<&Value> {
        match self.display(output_id)? {
            OutputDisplay::Ready(value) => Some(value),
            _ => None,
        }
    }

    /// A run just started: resource and transform nodes go pending, output
    /// nodes show a loading placeholder and forget previous results.
    pub(crate) fn arm(&mut self) {
        for node in self.nodes.values_mut() {
            node.output = None;
            if matches!(node.kind, NodeKind::Resource | NodeKind::Transform) {
                node.status = ExecutionStatus::Pending;
            }
        }
        for output in self.outputs.values_mut() {
            output.sources.clear();
            output.display = OutputDisplay::Loading;
        }
    }

    /// Record a step update and push its output into every output node the
    /// step feeds.
    pub(crate) fn apply_step(&mut self, node_id: &str, status: ExecutionStatus, output: Option<Value>) {
        if let Some(node) = self.nodes.get_mut(node_id) {
            node.status = status;
            if output.is_some() {
                node.output = output.clone();
            }
        }

        let Some(value) = output.filter(|v| !v.is_null()) else {
            return;
        };
        let Some(targets) = self.feeds.get(node_id) else {
            return;
        };
        for target in targets {
            if let Some(out) = self.outputs.get_mut(target) {
                out.sources.insert(node_id.to_owned(), value.clone());
                out.refresh();
            }
        }
    }

    /// The run failed. Outputs that already hold a result keep it; the rest
    /// show `message`.
    pub(crate) fn fail(&mut self, message: &str) {
        self.settle_nodes();
        for output in self.outputs.values_mut() {
            if !output.display.has_result() {
                output.display = OutputDisplay::Error(message.to_owned());
            }
        }
    }

    /// The run succeeded and no chained run followed.
    pub(crate) fn complete(&mut self) {
        self.settle_nodes();
        for output in self.outputs.values_mut() {
            if output.display == OutputDisplay::Loading {
                output.display = OutputDisplay::NoOutput;
            }
        }
    }

    /// Tracking was abandoned: everything back to idle, results kept.
    pub(crate) fn reset(&mut self) {
        self.settle_nodes();
        for output in self.outputs.values_mut() {
            if output.display == OutputDisplay::Loading {
                output.display = OutputDisplay::Idle;
            }
        }
    }

    fn settle_nodes(&mut self) {
        for node in self.nodes.values_mut() {
            node.status = ExecutionStatus::Idle;
        }
    }
}
