//! Engine-level error types.

use thiserror::Error;

/// Errors produced by graph validation, configuration and submission.
///
/// Planning itself never fails: a cyclic subgraph is reported through
/// [`crate::ExecutionPlan::dropped`], not through this type.
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Validation errors ------

    /// Two or more nodes share the same ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    /// An edge references a node ID that doesn't exist in the graph.
    #[error("edge references unknown node '{node_id}' ({side} side)")]
    UnknownNodeReference {
        node_id: String,
        side: &'static str,
    },

    // ------ Configuration errors ------

    #[error("no node with ID '{0}'")]
    UnknownNode(String),

    #[error("node '{0}' is not a resource node")]
    NotAResourceNode(String),

    // ------ Submission errors ------

    /// Nothing executable is reachable from the chosen triggers.
    #[error("no executable nodes are reachable from the selected triggers")]
    NothingExecutable,

    /// The backend rejected or never answered the run request.
    #[error("backend error: {0}")]
    Backend(#[from] backend::BackendError),
}
