//! Node-scoped configuration of resource inputs.
//!
//! Configured inputs live on the node, never on the shared resource
//! definition, so every helper here touches exactly one node.

use serde_json::{Map, Value};
use tracing::debug;

use crate::{EngineError, models::{Node, NodeKind, WorkflowGraph}};

/// Declared defaults overlaid with the node's own configured inputs.
///
/// Non-resource nodes and unconfigured resource nodes yield their configured
/// inputs unchanged.
pub fn effective_inputs(node: &Node) -> Map<String, Value> {
    let mut inputs = Map::new();
    if let Some(resource) = &node.data.resource {
        for input in &resource.inputs {
            if let Some(default) = &input.default {
                inputs.insert(input.name.clone(), default.clone());
            }
        }
    }
    for (key, value) in &node.data.configured_inputs {
        inputs.insert(key.clone(), value.clone());
    }
    inputs
}

/// Names of required inputs that neither a default nor the node supplies.
pub fn missing_required_inputs(node: &Node) -> Vec<String> {
    let Some(resource) = &node.data.resource else {
        return Vec::new();
    };
    let effective = effective_inputs(node);
    resource
        .inputs
        .iter()
        .filter(|input| input.required)
        .filter(|input| effective.get(&input.name).map_or(true, Value::is_null))
        .map(|input| input.name.clone())
        .collect()
}

/// Set one configured input on one resource node.
///
/// # Errors
/// - [`EngineError::UnknownNode`] if `node_id` is not in the graph.
/// - [`EngineError::NotAResourceNode`] if the node is not a resource node.
pub fn configure_input(
    graph: &mut WorkflowGraph,
    node_id: &str,
    key: impl Into<String>,
    value: Value,
) -> Result<(), EngineError> {
    let node = graph
        .node_mut(node_id)
        .ok_or_else(|| EngineError::UnknownNode(node_id.to_owned()))?;
    if node.kind != NodeKind::Resource {
        return Err(EngineError::NotAResourceNode(node_id.to_owned()));
    }

    let key = key.into();
    debug!(node_id, key = %key, "configured input");
    node.data.configured_inputs.insert(key, value);
    Ok(())
}
