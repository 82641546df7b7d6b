//! Test doubles for [`RunBackend`] and [`StatusSource`].
//!
//! Useful in unit and integration tests where a live backend is either
//! unavailable or irrelevant.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use crate::{BackendError, RunBackend, RunRequest, StatusSource};

// ---------------------------------------------------------------------------
// RecordingBackend
// ---------------------------------------------------------------------------

/// What `create_run` will do when called.
#[derive(Debug, Clone)]
pub enum CreateBehaviour {
    /// Hand out `run-1`, `run-2`, ... in call order.
    Sequential,
    /// Fail every submission with the given error.
    Fail(BackendError),
}

/// A backend that records every request it receives.
#[derive(Debug, Clone)]
pub struct RecordingBackend {
    behaviour: CreateBehaviour,
    fail_cancel: bool,
    /// Every submitted request, in call order.
    pub requests: Arc<Mutex<Vec<RunRequest>>>,
    /// Every cancelled run id, in call order.
    pub cancelled: Arc<Mutex<Vec<String>>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self {
            behaviour: CreateBehaviour::Sequential,
            fail_cancel: false,
            requests: Arc::new(Mutex::new(Vec::new())),
            cancelled: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A backend whose `create_run` always fails.
    pub fn failing(err: BackendError) -> Self {
        Self {
            behaviour: CreateBehaviour::Fail(err),
            ..Self::new()
        }
    }

    /// A backend that records cancellations but answers them with an error.
    pub fn rejecting_cancel() -> Self {
        Self {
            fail_cancel: true,
            ..Self::new()
        }
    }

    pub fn requests(&self) -> Vec<RunRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RunBackend for RecordingBackend {
    async fn create_run(&self, request: &RunRequest) -> Result<String, BackendError> {
        let mut requests = self.requests.lock().unwrap_or_else(PoisonError::into_inner);
        requests.push(request.clone());

        match &self.behaviour {
            CreateBehaviour::Sequential => Ok(format!("run-{}", requests.len())),
            CreateBehaviour::Fail(err) => Err(err.clone()),
        }
    }

    async fn cancel_run(&self, run_id: &str) -> Result<(), BackendError> {
        self.cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(run_id.to_owned());

        if self.fail_cancel {
            Err(BackendError::Status {
                status: 409,
                body: "run already finished".into(),
            })
        } else {
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// ScriptedStatusSource
// ---------------------------------------------------------------------------

/// Replays a fixed sequence of status responses.
///
/// Once the script runs out, the last response is repeated forever, which
/// makes "still running" sequences of any length cheap to express.
#[derive(Debug, Clone)]
pub struct ScriptedStatusSource {
    script: Arc<Mutex<VecDeque<Result<Value, BackendError>>>>,
    last: Arc<Mutex<Option<Result<Value, BackendError>>>>,
    /// Every URL fetched, in call order.
    pub fetched: Arc<Mutex<Vec<String>>>,
}

impl ScriptedStatusSource {
    pub fn new(script: impl IntoIterator<Item = Result<Value, BackendError>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into_iter().collect())),
            last: Arc::new(Mutex::new(None)),
            fetched: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A source that answers every fetch with `value`.
    pub fn repeating(value: Value) -> Self {
        Self::new([Ok(value)])
    }

    /// Number of fetches served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl StatusSource for ScriptedStatusSource {
    async fn fetch_status(&self, url: &str) -> Result<Value, BackendError> {
        self.fetched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(url.to_owned());

        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);

        match next {
            Some(response) => {
                *last = Some(response.clone());
                response
            }
            None => (*last)
                .clone()
                .unwrap_or_else(|| Err(BackendError::Request("status script is empty".into()))),
        }
    }
}
