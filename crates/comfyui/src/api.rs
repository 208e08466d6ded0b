//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps the ComfyUI HTTP API (reachability probe, workflow submission,
//! artifact download, cancellation, interruption, history retrieval)
//! using [`reqwest`]. The [`GenerationBackend`] trait is the seam the
//! rest of the crate talks to, so tests can stand in for the server.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::registry::ArtifactRef;

/// HTTP client for a single ComfyUI instance.
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
    probe_timeout: Duration,
}

/// Response returned by the ComfyUI `/prompt` endpoint after
/// successfully queuing a workflow.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: i32,
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

/// Operations the client needs from a generation server.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Base HTTP URL, used in log lines and errors.
    fn api_url(&self) -> &str;

    /// Cheap liveness probe (`GET /system_stats`).
    async fn check_reachable(&self) -> Result<(), ComfyUIApiError>;

    /// Queue a workflow (`POST /prompt`).
    async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError>;

    /// Download a finished image (`GET /view`).
    async fn fetch_artifact(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, ComfyUIApiError>;

    /// Drop a queued prompt (`POST /queue`).
    async fn cancel_execution(&self, prompt_id: &str) -> Result<(), ComfyUIApiError>;

    /// Stop whatever is running right now (`POST /interrupt`).
    async fn interrupt(&self) -> Result<(), ComfyUIApiError>;

    /// Execution record of a prompt (`GET /history/{prompt_id}`).
    async fn get_history(&self, prompt_id: &str) -> Result<serde_json::Value, ComfyUIApiError>;
}

impl ComfyUIApi {
    /// Create a new API client for a ComfyUI instance.
    ///
    /// * `api_url`       - Base HTTP URL, e.g. `http://host:8000`.
    /// * `probe_timeout` - Timeout of the reachability probe only.
    pub fn new(api_url: String, probe_timeout: Duration) -> Self {
        Self::with_client(reqwest::Client::new(), api_url, probe_timeout)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: String, probe_timeout: Duration) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            probe_timeout,
        }
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ComfyUIApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), ComfyUIApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

#[async_trait]
impl GenerationBackend for ComfyUIApi {
    fn api_url(&self) -> &str {
        &self.api_url
    }

    async fn check_reachable(&self) -> Result<(), ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/system_stats", self.api_url))
            .timeout(self.probe_timeout)
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Sends a `POST /prompt` request with the given workflow JSON and
    /// client ID. Returns the server-assigned `prompt_id` and queue
    /// position.
    async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": client_id,
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .json(&body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    async fn fetch_artifact(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/view", self.api_url))
            .query(&[
                ("filename", artifact.filename.as_str()),
                ("subfolder", artifact.subfolder.as_str()),
                ("type", artifact.kind.as_str()),
            ])
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Sends a `POST /queue` request asking ComfyUI to delete the
    /// specified prompt from the queue.
    async fn cancel_execution(&self, prompt_id: &str) -> Result<(), ComfyUIApiError> {
        let body = serde_json::json!({
            "delete": [prompt_id],
        });

        let response = self
            .client
            .post(format!("{}/queue", self.api_url))
            .json(&body)
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// This does not target a specific prompt; it interrupts whatever is
    /// executing right now.
    async fn interrupt(&self) -> Result<(), ComfyUIApiError> {
        let response = self
            .client
            .post(format!("{}/interrupt", self.api_url))
            .send()
            .await?;

        Self::check_status(response).await
    }

    async fn get_history(&self, prompt_id: &str) -> Result<serde_json::Value, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, prompt_id))
            .send()
            .await?;

        Self::parse_response(response).await
    }
}
