//! The polling loop.
//!
//! [`PollingEngine`] waits a fixed interval, fetches the status URL, and
//! classifies the answer until it is terminal, the attempt ceiling is hit,
//! or the caller's [`CancellationToken`] fires. [`PollTask`] runs the same
//! loop on a spawned task and cancels it when dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use backend::StatusSource;

use crate::classify::{classify, PollProgress, PollResult, PollStatus};
use crate::error::PollError;

/// Tuning knobs for [`PollingEngine`].
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Fixed wait before every fetch, including the first.
    pub interval: Duration,
    /// Fetches allowed before giving up with [`PollError::Timeout`].
    pub max_attempts: u32,
    /// Consecutive transient fetch errors tolerated before failing.
    /// `0` fails on the first error.
    pub transient_retries: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 120,
            transient_retries: 0,
        }
    }
}

/// Polls a status URL until the operation behind it finishes.
#[derive(Clone)]
pub struct PollingEngine {
    source: Arc<dyn StatusSource>,
    config: PollerConfig,
}

impl PollingEngine {
    pub fn new(source: Arc<dyn StatusSource>, config: PollerConfig) -> Self {
        Self { source, config }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Poll `url` to completion, ignoring progress.
    pub async fn poll(&self, url: &str, cancel: &CancellationToken) -> Result<PollResult, PollError> {
        self.poll_with_progress(url, cancel, |_| {}).await
    }

    /// Poll `url` to completion, calling `on_progress` after every
    /// non-terminal response.
    ///
    /// Cancelling `cancel` abandons the pending wait or fetch at once and
    /// returns [`PollError::Cancelled`].
    #[instrument(skip(self, cancel, on_progress), fields(max_attempts = self.config.max_attempts))]
    pub async fn poll_with_progress<F>(
        &self,
        url: &str,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<PollResult, PollError>
    where
        F: FnMut(&PollProgress),
    {
        let mut attempts: u32 = 0;
        let mut transient_failures: u32 = 0;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PollError::Cancelled),
                _ = tokio::time::sleep(self.config.interval) => {}
            }

            attempts += 1;
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PollError::Cancelled),
                fetched = self.source.fetch_status(url) => fetched,
            };

            match fetched {
                Ok(payload) => {
                    transient_failures = 0;
                    match classify(&payload) {
                        PollStatus::Succeeded(result) => {
                            info!(attempts, artifact = ?result.artifact_url, "operation completed");
                            return Ok(result);
                        }
                        PollStatus::Failed(message) => {
                            warn!(attempts, %message, "operation failed");
                            return Err(PollError::Failed(message));
                        }
                        PollStatus::Pending(progress) => {
                            debug!(attempts, status = ?progress.status_line, "still pending");
                            on_progress(&progress);
                        }
                    }
                }
                Err(e) if e.is_transient() && transient_failures < self.config.transient_retries => {
                    transient_failures += 1;
                    warn!(
                        "transient status error (retry {}/{}): {}",
                        transient_failures, self.config.transient_retries, e
                    );
                }
                Err(e) => {
                    warn!(attempts, error = %e, "status fetch failed");
                    return Err(PollError::Network(e));
                }
            }

            if attempts >= self.config.max_attempts {
                warn!(attempts, "giving up on pending operation");
                return Err(PollError::Timeout);
            }
        }
    }

    /// Run [`poll_with_progress`](Self::poll_with_progress) on its own task.
    ///
    /// The returned [`PollTask`] owns the cancellation token; dropping it
    /// stops the poll.
    pub fn spawn(&self, url: impl Into<String>) -> PollTask {
        let url = url.into();
        let cancel = CancellationToken::new();
        let (progress_tx, progress_rx) = watch::channel(None);

        let engine = self.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            engine
                .poll_with_progress(&url, &token, |progress| {
                    progress_tx.send_replace(Some(progress.clone()));
                })
                .await
        });

        PollTask {
            cancel,
            handle,
            progress: progress_rx,
        }
    }
}

/// A poll running in the background.
pub struct PollTask {
    cancel: CancellationToken,
    handle: JoinHandle<Result<PollResult, PollError>>,
    progress: watch::Receiver<Option<PollProgress>>,
}

impl PollTask {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Latest progress seen, if any tick has reported some.
    pub fn progress(&self) -> watch::Receiver<Option<PollProgress>> {
        self.progress.clone()
    }

    /// Wait for the poll to finish.
    pub async fn join(mut self) -> Result<PollResult, PollError> {
        match (&mut self.handle).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("poll task ended abnormally: {}", e);
                Err(PollError::Cancelled)
            }
        }
    }
}

impl Drop for PollTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend::mock::ScriptedStatusSource;
    use backend::BackendError;
    use serde_json::json;

    fn engine(source: &ScriptedStatusSource, config: PollerConfig) -> PollingEngine {
        PollingEngine::new(Arc::new(source.clone()), config)
    }

    #[tokio::test(start_paused = true)]
    async fn completes_with_the_artifact() {
        let source = ScriptedStatusSource::new([
            Ok(json!({ "state": "queued" })),
            Ok(json!({ "state": "running" })),
            Ok(json!({ "state": "completed", "artifactUrl": "http://x" })),
        ]);

        let result = engine(&source, PollerConfig::default())
            .poll("http://status/1", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.artifact_url.as_deref(), Some("http://x"));
        assert_eq!(result.payload["artifactUrl"], "http://x");
        assert_eq!(source.fetch_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_one_interval_before_each_fetch() {
        let source = ScriptedStatusSource::new([
            Ok(json!({ "state": "running" })),
            Ok(json!({ "state": "completed" })),
        ]);
        let started = tokio::time::Instant::now();

        engine(&source, PollerConfig::default())
            .poll("u", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn backend_failure_carries_its_message() {
        let source = ScriptedStatusSource::repeating(json!({ "state": "failed", "error": "boom" }));

        let err = engine(&source, PollerConfig::default())
            .poll("u", &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err, PollError::Failed("boom".into()));
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_after_max_attempts() {
        let source = ScriptedStatusSource::repeating(json!({ "state": "running" }));

        let err = engine(&source, PollerConfig::default())
            .poll("u", &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Request timed out");
        assert_eq!(source.fetch_count(), 120);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_error_fails_fast_by_default() {
        let source = ScriptedStatusSource::new([
            Ok(json!({ "state": "running" })),
            Err(BackendError::Request("connection reset".into())),
            Ok(json!({ "state": "completed" })),
        ]);

        let err = engine(&source, PollerConfig::default())
            .poll("u", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, PollError::Network(_)));
        assert_eq!(err.to_string(), "Unable to reach the server while checking status");
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_when_configured() {
        let source = ScriptedStatusSource::new([
            Err(BackendError::Status { status: 503, body: String::new() }),
            Err(BackendError::Request("timeout".into())),
            Ok(json!({ "status": "success", "result": 7 })),
        ]);
        let config = PollerConfig { transient_retries: 2, ..PollerConfig::default() };

        let result = engine(&source, config)
            .poll("u", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.value, json!(7));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_bounded_and_skip_permanent_errors() {
        let source = ScriptedStatusSource::new([
            Err(BackendError::Request("down".into())),
            Err(BackendError::Request("still down".into())),
        ]);
        let config = PollerConfig { transient_retries: 1, ..PollerConfig::default() };
        let err = engine(&source, config.clone())
            .poll("u", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, PollError::Network(BackendError::Request("still down".into())));

        let source = ScriptedStatusSource::new([Err(BackendError::Status {
            status: 404,
            body: "no such operation".into(),
        })]);
        let err = engine(&source, config)
            .poll("u", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PollError::Network(BackendError::Status { status: 404, .. })));
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn progress_is_reported_on_pending_ticks() {
        let source = ScriptedStatusSource::new([
            Ok(json!({ "steps": [{ "name": "render", "status": "running" }] })),
            Ok(json!({ "progress": { "completed": 3, "total": 4 }, "message": "Almost there" })),
            Ok(json!({ "state": "completed", "output": "done" })),
        ]);

        let mut lines = Vec::new();
        let result = engine(&source, PollerConfig::default())
            .poll_with_progress("u", &CancellationToken::new(), |p| {
                lines.push(p.status_line.clone());
            })
            .await
            .unwrap();

        assert_eq!(
            lines,
            vec![Some("Running: render".to_string()), Some("Almost there".to_string())]
        );
        assert_eq!(result.value, json!("done"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_first_fetch() {
        let source = ScriptedStatusSource::repeating(json!({ "state": "running" }));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = engine(&source, PollerConfig::default())
            .poll("u", &cancel)
            .await
            .unwrap_err();

        assert_eq!(err, PollError::Cancelled);
        assert_eq!(source.fetch_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_task_reports_progress_and_result() {
        let source = ScriptedStatusSource::new([
            Ok(json!({ "progress": { "completed": 1, "total": 2 } })),
            Ok(json!({ "state": "completed", "imageUrl": "http://img" })),
        ]);

        let task = engine(&source, PollerConfig::default()).spawn("u");
        let progress = task.progress();
        let result = task.join().await.unwrap();

        assert_eq!(result.artifact_url.as_deref(), Some("http://img"));
        let last = progress.borrow().clone().unwrap();
        assert_eq!((last.completed, last.total), (Some(1), Some(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_a_task_stops_fetching() {
        let source = ScriptedStatusSource::repeating(json!({ "state": "running" }));

        let task = engine(&source, PollerConfig::default()).spawn("u");
        tokio::time::sleep(Duration::from_secs(12)).await;
        let seen = source.fetch_count();
        assert_eq!(seen, 2);

        drop(task);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(source.fetch_count(), seen);
    }
}
