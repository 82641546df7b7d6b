//! `engine` crate: graph model, execution planning, and plan submission.
//!
//! Planning is a pipeline of pure functions over a [`WorkflowGraph`]:
//! reachability from the triggers, dependency levelling, then step
//! compilation. [`WorkflowExecutor`] wraps the pipeline and hands the
//! result to a [`backend::RunBackend`].

pub mod compiler;
pub mod configuration;
pub mod dag;
pub mod error;
pub mod executor;
pub mod models;
pub mod pricing;

pub use compiler::{compile_plan, ExecutionPlan};
pub use dag::{execution_levels, reachable_nodes, validate_graph, Levels};
pub use error::EngineError;
pub use executor::{Submission, SubmitOptions, WorkflowExecutor};
pub use models::{Edge, Node, NodeData, NodeKind, ResourceInput, ResourceRef, WorkflowGraph};
