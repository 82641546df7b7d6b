//! HTTP implementation of [`RunBackend`] and [`StatusSource`] on top of `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::types::CreateRunResponse;
use crate::{BackendError, RunBackend, RunRequest, StatusSource};

/// Connection settings for [`HttpBackend`].
#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    /// Base URL of the execution API, e.g. `https://api.example.com/v1`.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Talks to the execution backend over HTTP/JSON.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    config: HttpBackendConfig,
}

impl HttpBackend {
    pub fn new(config: HttpBackendConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(BackendError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl RunBackend for HttpBackend {
    #[instrument(skip(self, request), fields(job_id = %request.job_id, steps = request.steps.len()))]
    async fn create_run(&self, request: &RunRequest) -> Result<String, BackendError> {
        let response = self
            .client
            .post(self.endpoint("runs"))
            .json(request)
            .send()
            .await?;
        let created: CreateRunResponse = Self::ensure_success(response).await?.json().await?;
        debug!(run_id = %created.run.id, "run created");
        Ok(created.run.id)
    }

    #[instrument(skip(self))]
    async fn cancel_run(&self, run_id: &str) -> Result<(), BackendError> {
        let response = self
            .client
            .post(self.endpoint(&format!("runs/{run_id}/cancel")))
            .send()
            .await?;
        Self::ensure_success(response).await?;
        Ok(())
    }
}

#[async_trait]
impl StatusSource for HttpBackend {
    async fn fetch_status(&self, url: &str) -> Result<Value, BackendError> {
        let response = self.client.get(url).send().await?;
        let body = Self::ensure_success(response).await?.json().await?;
        Ok(body)
    }
}
