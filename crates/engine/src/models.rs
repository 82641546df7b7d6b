//! Graph models for the workflow planner.
//!
//! These types mirror what the canvas editor persists: a flat node list
//! and a flat edge list. The editor owns them; the planner only ever
//! borrows a [`WorkflowGraph`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// NodeKind
// ---------------------------------------------------------------------------

/// The type of a canvas node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Virtual root. Never executed, never a dependency.
    Trigger,
    /// Calls a paid resource from the marketplace.
    Resource,
    /// Reshapes upstream output.
    Transform,
    /// Supplies a constant or user-provided value.
    Source,
    /// Displays results. Receives output, never executes.
    Output,
}

// ---------------------------------------------------------------------------
// ResourceRef
// ---------------------------------------------------------------------------

/// An input declared by a resource definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceInput {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// The resource definition a resource node points at.
///
/// Several nodes may reference the same definition; each keeps its own
/// configured inputs in [`NodeData::configured_inputs`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub id: String,
    pub name: String,
    pub price: f64,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<ResourceInput>,
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// Type-specific node payload.
///
/// The editor stores one loose bag per node; which fields matter depends on
/// the node's [`NodeKind`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Resource nodes: the selected resource, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceRef>,

    /// Resource nodes: inputs configured on this node only.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub configured_inputs: Map<String, Value>,

    /// Transform nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform_type: Option<String>,

    /// Source nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,

    /// Transform and source nodes: free-form configuration.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub config: Value,
}

/// A single node on the canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier within this graph (referenced by edges).
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default)]
    pub data: NodeData,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            data: NodeData::default(),
        }
    }

    /// A resource node pointing at `resource`.
    pub fn resource(id: impl Into<String>, resource: ResourceRef) -> Self {
        let mut node = Self::new(id, NodeKind::Resource);
        node.data.resource = Some(resource);
        node
    }

    /// Whether the planner turns this node into a step.
    ///
    /// Resource nodes only qualify once a resource has been selected.
    pub fn is_executable(&self) -> bool {
        match self.kind {
            NodeKind::Resource => self.data.resource.is_some(),
            NodeKind::Transform | NodeKind::Source => true,
            NodeKind::Trigger | NodeKind::Output => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Edge
// ---------------------------------------------------------------------------

/// Directed edge from one node to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowGraph
// ---------------------------------------------------------------------------

/// The node/edge collection, passed by reference into every planning function.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl WorkflowGraph {
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self { nodes, edges }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    /// Node lookup map. First occurrence wins if ids collide.
    pub fn index(&self) -> HashMap<&str, &Node> {
        let mut index = HashMap::with_capacity(self.nodes.len());
        for node in &self.nodes {
            index.entry(node.id.as_str()).or_insert(node);
        }
        index
    }

    /// Outgoing adjacency in edge order.
    pub fn adjacency(&self) -> HashMap<&str, Vec<&str>> {
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &self.edges {
            adjacency
                .entry(edge.source.as_str())
                .or_default()
                .push(edge.target.as_str());
        }
        adjacency
    }

    /// Edges pointing at `node_id`, in edge order.
    pub fn incoming<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.target == node_id)
    }

    /// Edges leaving `node_id`, in edge order.
    pub fn outgoing<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.source == node_id)
    }
}
