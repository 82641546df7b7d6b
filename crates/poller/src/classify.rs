//! Classification of status responses.
//!
//! Status endpoints disagree on shape. This module accepts the common ones:
//! - `state` or `status` decides terminal success or failure;
//! - a `steps` array, or a numeric `progress { completed, total }`, gives progress;
//! - a free-text `message` replaces the status line unless `steps` is present;
//! - the result is an artifact URL when one is advertised, else a generic
//!   `result`/`response`/`output` field, else the whole payload.

use serde::Serialize;
use serde_json::Value;

/// Status line while no step is running and some are still to come.
pub const STARTING: &str = "Starting…";
/// Status line once every step reports done but the operation has not.
pub const COMPLETING: &str = "Completing…";
/// Fallback failure message when the payload gives none.
pub const DEFAULT_FAILURE: &str = "Request failed";

const SUCCESS_STATES: [&str; 3] = ["completed", "success", "succeeded"];
const FAILURE_STATES: [&str; 2] = ["failed", "error"];
const ARTIFACT_FIELDS: [&str; 3] = ["artifactUrl", "imageUrl", "url"];
const RESULT_FIELDS: [&str; 3] = ["result", "response", "output"];

/// One entry of a `steps` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepProgress {
    pub name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Progress reported by a non-terminal response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollProgress {
    pub completed: Option<u64>,
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepProgress>,
    pub status_line: Option<String>,
}

/// What a successful operation produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResult {
    /// The advertised artifact, when there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_url: Option<String>,
    /// Artifact URL, generic result field, or the whole payload, in that order.
    pub value: Value,
    /// The final response as received.
    pub payload: Value,
}

/// One response, classified.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus {
    Pending(PollProgress),
    Succeeded(PollResult),
    Failed(String),
}

/// Classify one status response.
///
/// `state` and `status` are both consulted; the first of them holding a
/// terminal value decides, so `{"state": "processing", "status": "completed"}`
/// counts as done.
pub fn classify(payload: &Value) -> PollStatus {
    let terminal = ["state", "status"]
        .iter()
        .filter_map(|field| payload.get(*field).and_then(Value::as_str))
        .map(str::to_ascii_lowercase)
        .find(|s| is_success(s) || FAILURE_STATES.contains(&s.as_str()));

    match terminal {
        Some(s) if is_success(&s) => PollStatus::Succeeded(extract_result(payload)),
        Some(_) => {
            let message = text_field(payload, "error")
                .or_else(|| text_field(payload, "message"))
                .unwrap_or_else(|| DEFAULT_FAILURE.to_string());
            PollStatus::Failed(message)
        }
        None => PollStatus::Pending(progress(payload)),
    }
}

fn is_success(state: &str) -> bool {
    SUCCESS_STATES.contains(&state)
}

fn progress(payload: &Value) -> PollProgress {
    if let Some(steps) = payload.get("steps").and_then(Value::as_array) {
        return step_progress(steps);
    }

    let counts = payload.get("progress");
    PollProgress {
        completed: counts.and_then(|p| p.get("completed")).and_then(Value::as_u64),
        total: counts.and_then(|p| p.get("total")).and_then(Value::as_u64),
        steps: Vec::new(),
        status_line: text_field(payload, "message"),
    }
}

fn step_progress(raw: &[Value]) -> PollProgress {
    let steps: Vec<StepProgress> = raw
        .iter()
        .enumerate()
        .map(|(i, step)| StepProgress {
            name: text_field(step, "name")
                .or_else(|| text_field(step, "id"))
                .unwrap_or_else(|| format!("Step {}", i + 1)),
            status: text_field(step, "status")
                .map(|s| s.to_ascii_lowercase())
                .unwrap_or_else(|| "pending".to_string()),
            error: text_field(step, "error"),
        })
        .collect();

    let completed = steps.iter().filter(|s| is_success(&s.status)).count();
    let total = steps.len();

    let status_line = match steps.iter().find(|s| s.status == "running") {
        Some(running) => format!("Running: {}", running.name),
        None if completed == total => COMPLETING.to_string(),
        None => STARTING.to_string(),
    };

    PollProgress {
        completed: Some(completed as u64),
        total: Some(total as u64),
        steps,
        status_line: Some(status_line),
    }
}

fn extract_result(payload: &Value) -> PollResult {
    let nested = payload.get("result").filter(|r| r.is_object());
    let artifact_url = artifact_url(payload).or_else(|| nested.and_then(artifact_url));

    let value = match &artifact_url {
        Some(url) => Value::String(url.clone()),
        None => RESULT_FIELDS
            .iter()
            .filter_map(|field| payload.get(*field))
            .find(|v| !v.is_null())
            .cloned()
            .unwrap_or_else(|| payload.clone()),
    };

    PollResult {
        artifact_url,
        value,
        payload: payload.clone(),
    }
}

fn artifact_url(payload: &Value) -> Option<String> {
    ARTIFACT_FIELDS
        .iter()
        .find_map(|field| text_field(payload, field))
        .or_else(|| {
            let first = payload.get("images")?.as_array()?.first()?;
            first
                .as_str()
                .map(str::to_owned)
                .or_else(|| text_field(first, "url"))
        })
}

fn text_field(value: &Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}
