//! Graph analysis: structural validation, reachability, and levelling.
//!
//! [`validate_graph`] is strict and returns the first violation it finds.
//! [`reachable_nodes`] and [`execution_levels`] are total: they ignore edges
//! that point nowhere and never fail, so the planner can run on whatever the
//! editor currently holds.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::{EngineError, models::{NodeKind, WorkflowGraph}};

/// Validate node-id uniqueness and edge endpoints.
///
/// # Errors
/// - [`EngineError::DuplicateNodeId`] if two nodes share an ID.
/// - [`EngineError::UnknownNodeReference`] if an edge references a missing node.
pub fn validate_graph(graph: &WorkflowGraph) -> Result<(), EngineError> {
    let mut seen_ids: HashSet<&str> = HashSet::new();
    for node in &graph.nodes {
        if !seen_ids.insert(node.id.as_str()) {
            return Err(EngineError::DuplicateNodeId(node.id.clone()));
        }
    }

    for edge in &graph.edges {
        if !seen_ids.contains(edge.source.as_str()) {
            return Err(EngineError::UnknownNodeReference {
                node_id: edge.source.clone(),
                side: "source",
            });
        }
        if !seen_ids.contains(edge.target.as_str()) {
            return Err(EngineError::UnknownNodeReference {
                node_id: edge.target.clone(),
                side: "target",
            });
        }
    }

    Ok(())
}

/// Every executable node on a directed path from a trigger.
///
/// `trigger_ids` narrows the roots to a subset of the trigger nodes; `None`
/// starts from all of them. Ids in the subset that are not trigger nodes are
/// ignored.
///
/// Traversal passes through every visited node, executable or not, so a
/// chain through an unconfigured resource still reaches what lies beyond it.
pub fn reachable_nodes<'a>(
    graph: &'a WorkflowGraph,
    trigger_ids: Option<&[String]>,
) -> HashSet<&'a str> {
    let index = graph.index();
    let adjacency = graph.adjacency();

    let roots: Vec<&str> = graph
        .nodes
        .iter()
        .filter(|n| n.kind == NodeKind::Trigger)
        .filter(|n| trigger_ids.map_or(true, |ids| ids.iter().any(|id| *id == n.id)))
        .map(|n| n.id.as_str())
        .collect();

    let mut visited: HashSet<&str> = roots.iter().copied().collect();
    let mut queue: VecDeque<&str> = roots.into_iter().collect();
    let mut reachable: HashSet<&str> = HashSet::new();

    while let Some(node_id) = queue.pop_front() {
        let Some(neighbours) = adjacency.get(node_id) else {
            continue;
        };
        for &next in neighbours {
            if !visited.insert(next) {
                continue;
            }
            if index.get(next).is_some_and(|n| n.is_executable()) {
                reachable.insert(next);
            }
            queue.push_back(next);
        }
    }

    reachable
}

/// Result of levelling a reachable set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Levels {
    /// Level N holds nodes whose dependencies all sit in levels < N.
    pub levels: Vec<Vec<String>>,
    /// Reachable nodes that never reached in-degree zero: they sit on, or
    /// downstream of, a cycle.
    pub dropped: Vec<String>,
}

/// Group the reachable set into dependency levels (Kahn's algorithm, one
/// frontier at a time).
///
/// Only edges with both endpoints in `reachable` count, so edges leaving a
/// trigger never add in-degree. Within a level, nodes keep the order they
/// have in the graph's node list, which makes the output deterministic.
pub fn execution_levels(graph: &WorkflowGraph, reachable: &HashSet<&str>) -> Levels {
    let mut order: Vec<&str> = Vec::with_capacity(reachable.len());
    let mut seen: HashSet<&str> = HashSet::new();
    for node in &graph.nodes {
        let id = node.id.as_str();
        if reachable.contains(id) && seen.insert(id) {
            order.push(id);
        }
    }

    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut in_degree: HashMap<&str, usize> = order.iter().map(|&id| (id, 0)).collect();

    for edge in &graph.edges {
        let (from, to) = (edge.source.as_str(), edge.target.as_str());
        if !(reachable.contains(from) && reachable.contains(to)) {
            continue;
        }
        adjacency.entry(from).or_default().push(to);
        *in_degree.entry(to).or_insert(0) += 1;
    }

    let mut levels: Vec<Vec<String>> = Vec::new();
    let mut placed: HashSet<&str> = HashSet::new();
    let mut frontier: Vec<&str> = order
        .iter()
        .copied()
        .filter(|id| in_degree.get(id) == Some(&0))
        .collect();

    while !frontier.is_empty() {
        let mut ready: HashSet<&str> = HashSet::new();
        for &node_id in &frontier {
            placed.insert(node_id);
            if let Some(neighbours) = adjacency.get(node_id) {
                for &neighbour in neighbours {
                    if let Some(deg) = in_degree.get_mut(neighbour) {
                        *deg = deg.saturating_sub(1);
                        if *deg == 0 {
                            ready.insert(neighbour);
                        }
                    }
                }
            }
        }

        levels.push(frontier.iter().map(|id| id.to_string()).collect());
        frontier = order
            .iter()
            .copied()
            .filter(|id| ready.contains(id) && !placed.contains(id))
            .collect();
    }

    let dropped = order
        .iter()
        .filter(|id| !placed.contains(*id))
        .map(|id| id.to_string())
        .collect();

    Levels { levels, dropped }
}
