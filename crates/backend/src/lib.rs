//! `backend` crate: the contract between this core and the execution backend.
//!
//! The backend itself is external. This crate owns the wire types it accepts
//! (`RunRequest`, `WorkflowStep`), the [`RunBackend`] and [`StatusSource`]
//! traits the rest of the workspace dispatches through, an HTTP
//! implementation of both, and scripted doubles for tests.

pub mod error;
pub mod http;
pub mod mock;
pub mod traits;
pub mod types;

pub use error::BackendError;
pub use http::{HttpBackend, HttpBackendConfig};
pub use traits::{RunBackend, StatusSource};
pub use types::{
    ResourceStepData, RunRequest, SourceStepData, StepData, StepKind, TransformStepData,
    WorkflowStep,
};
