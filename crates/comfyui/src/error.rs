//! Typed failures of the generation pipeline.
//!
//! Every public operation of the client returns [`GenerationError`];
//! callers treat any variant as "no artifact this turn".

use zeniji_core::error::CoreError;
use zeniji_core::types::PromptId;

use crate::api::ComfyUIApiError;
use crate::registry::ErrorDetail;

/// Maximum number of characters of a server response kept in errors.
pub const BODY_EXCERPT_LIMIT: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// The reachability probe failed; the push channel was not touched.
    #[error("ComfyUI server at {url} is unreachable: {reason}")]
    ServerUnreachable { url: String, reason: String },

    /// The push channel could not be opened in time.
    #[error("Push channel did not open: {0}")]
    ChannelTimeout(String),

    /// The push channel cannot be closed while jobs are outstanding.
    #[error("Push channel busy with {pending} pending job(s)")]
    ChannelBusy { pending: usize },

    /// Template, role resolution or mutation failure.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The server rejected the job graph or the request never arrived.
    #[error("Job submission failed (status {status:?}): {body_excerpt}")]
    SubmissionFailed {
        /// `None` for transport failures.
        status: Option<u16>,
        body_excerpt: String,
    },

    /// The server reported a failure while running the job.
    #[error(
        "Execution of {prompt_id} failed ({}): {}",
        .detail.category.as_str(),
        .detail.message
    )]
    ExecutionError {
        prompt_id: PromptId,
        detail: ErrorDetail,
    },

    /// The job completed but no artifact arrived within the grace window.
    #[error("Job {prompt_id} completed without an artifact")]
    ArtifactTimeout { prompt_id: PromptId },

    /// The overall deadline passed before the job reached a terminal state.
    #[error("Job {prompt_id} exceeded the hard timeout")]
    HardTimeout { prompt_id: PromptId },

    /// The artifact was announced but could not be downloaded.
    #[error("Failed to fetch artifact for {prompt_id}: {reason}")]
    ArtifactFetchFailed { prompt_id: PromptId, reason: String },

    /// The caller cancelled the wait.
    #[error("Job {prompt_id} was cancelled")]
    Cancelled { prompt_id: PromptId },

    /// The waiter was asked about an id that was never registered.
    #[error("Unknown job {0}")]
    UnknownJob(PromptId),
}

impl GenerationError {
    /// Build a [`GenerationError::SubmissionFailed`] from an HTTP layer
    /// error, truncating the response body.
    pub fn submission(err: ComfyUIApiError) -> Self {
        match err {
            ComfyUIApiError::ApiError { status, body } => GenerationError::SubmissionFailed {
                status: Some(status),
                body_excerpt: excerpt(&body),
            },
            ComfyUIApiError::Request(e) => GenerationError::SubmissionFailed {
                status: e.status().map(|s| s.as_u16()),
                body_excerpt: excerpt(&e.to_string()),
            },
        }
    }

    /// `true` when the server itself is down or unreachable, so callers
    /// can back off instead of retrying every turn.
    pub fn is_server_down(&self) -> bool {
        matches!(
            self,
            GenerationError::ServerUnreachable { .. } | GenerationError::ChannelTimeout(_)
        )
    }
}

/// First [`BODY_EXCERPT_LIMIT`] characters of `body`.
pub fn excerpt(body: &str) -> String {
    body.chars().take(BODY_EXCERPT_LIMIT).collect()
}
