//! The collaborator traits every backend implementation must fulfil.

use async_trait::async_trait;
use serde_json::Value;

use crate::{BackendError, RunRequest};

/// Creates and cancels runs on the execution backend.
#[async_trait]
pub trait RunBackend: Send + Sync {
    /// Submit a compiled plan and return the id of the run the backend created.
    async fn create_run(&self, request: &RunRequest) -> Result<String, BackendError>;

    /// Ask the backend to stop a run. Advisory: callers do not wait on the
    /// outcome before resetting their own state.
    async fn cancel_run(&self, run_id: &str) -> Result<(), BackendError>;
}

/// Fetches the JSON status document behind a long-running operation's status URL.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_status(&self, url: &str) -> Result<Value, BackendError>;
}
