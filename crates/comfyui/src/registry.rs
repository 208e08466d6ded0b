//! Pending-job registry shared by the dispatcher and the result waiter.
//!
//! Entries are created by the submitter, updated only by the dispatcher
//! and read/removed only by the waiter. All access goes through one
//! mutex; no method holds the lock across an `.await` on anything else.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use zeniji_core::types::PromptId;

// ---------------------------------------------------------------------------
// Artifact reference
// ---------------------------------------------------------------------------

/// Location of a finished image on the server (`/view` query parameters).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// Storage kind: `output`, `temp` or `input`.
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
}

fn default_kind() -> String {
    "output".to_string()
}

// ---------------------------------------------------------------------------
// Error detail
// ---------------------------------------------------------------------------

/// Coarse classification of a server-reported failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// A model, LoRA or other file referenced by the graph is missing.
    MissingAsset,
    OutOfMemory,
    /// The server rejected the graph itself (bad links, bad values).
    InvalidGraph,
    Interrupted,
    Execution,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::MissingAsset => "missing_asset",
            ErrorCategory::OutOfMemory => "out_of_memory",
            ErrorCategory::InvalidGraph => "invalid_graph",
            ErrorCategory::Interrupted => "interrupted",
            ErrorCategory::Execution => "execution",
        }
    }

    /// Classify from the exception type and message of an
    /// `execution_error` message.
    pub fn classify(exception_type: &str, message: &str) -> Self {
        let haystack = format!("{exception_type} {message}").to_lowercase();
        if haystack.contains("out of memory") || haystack.contains("outofmemory") {
            ErrorCategory::OutOfMemory
        } else if haystack.contains("not found")
            || haystack.contains("filenotfound")
            || haystack.contains("no such file")
            || haystack.contains("value not in list")
        {
            ErrorCategory::MissingAsset
        } else if haystack.contains("interrupt") {
            ErrorCategory::Interrupted
        } else if haystack.contains("validation") || haystack.contains("invalid prompt") {
            ErrorCategory::InvalidGraph
        } else {
            ErrorCategory::Execution
        }
    }
}

/// A failure recorded against a pending job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDetail {
    pub category: ErrorCategory,
    pub message: String,
    /// Exception type and traceback, when the server sent them.
    pub raw_detail: Option<String>,
}

// ---------------------------------------------------------------------------
// Pending job
// ---------------------------------------------------------------------------

/// Progress of one submitted job as seen through the push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingJob {
    pub prompt_id: PromptId,
    pub artifact_ref: Option<ArtifactRef>,
    /// The graph finished running; the artifact may still be in flight.
    pub completed: bool,
    pub error: Option<ErrorDetail>,
}

impl PendingJob {
    fn new(prompt_id: PromptId) -> Self {
        Self {
            prompt_id,
            artifact_ref: None,
            completed: false,
            error: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Map of outstanding jobs keyed by `prompt_id`.
///
/// Owned by one client instance and shared through `Arc`.
#[derive(Debug, Default)]
pub struct PendingJobRegistry {
    jobs: Mutex<HashMap<PromptId, PendingJob>>,
}

impl PendingJobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh entry, replacing any stale one with the same id.
    pub async fn register(&self, prompt_id: &str) {
        self.jobs
            .lock()
            .await
            .insert(prompt_id.to_string(), PendingJob::new(prompt_id.to_string()));
    }

    /// Mark the graph as finished. Returns `false` for unknown ids.
    pub async fn mark_completed(&self, prompt_id: &str) -> bool {
        match self.jobs.lock().await.get_mut(prompt_id) {
            Some(job) => {
                job.completed = true;
                true
            }
            None => false,
        }
    }

    /// Record the artifact location. Only the first artifact of a job is
    /// kept; returns `true` when this call stored it.
    pub async fn record_artifact(&self, prompt_id: &str, artifact: ArtifactRef) -> bool {
        match self.jobs.lock().await.get_mut(prompt_id) {
            Some(job) if job.artifact_ref.is_none() => {
                job.artifact_ref = Some(artifact);
                true
            }
            _ => false,
        }
    }

    /// Record a terminal failure. The first error wins.
    pub async fn record_error(&self, prompt_id: &str, detail: ErrorDetail) -> bool {
        match self.jobs.lock().await.get_mut(prompt_id) {
            Some(job) if job.error.is_none() => {
                job.error = Some(detail);
                true
            }
            _ => false,
        }
    }

    /// Copy of the current entry state.
    pub async fn snapshot(&self, prompt_id: &str) -> Option<PendingJob> {
        self.jobs.lock().await.get(prompt_id).cloned()
    }

    pub async fn remove(&self, prompt_id: &str) -> Option<PendingJob> {
        self.jobs.lock().await.remove(prompt_id)
    }

    /// Remove `prompt_id` without awaiting the lock.
    ///
    /// Used from `Drop`. When the lock is held elsewhere the removal is
    /// handed to a spawned task on the current runtime.
    pub fn remove_detached(self: &Arc<Self>, prompt_id: &str) {
        if let Ok(mut jobs) = self.jobs.try_lock() {
            jobs.remove(prompt_id);
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(prompt_id, "No runtime to remove pending job, entry kept");
            return;
        };
        let registry = Arc::clone(self);
        let prompt_id = prompt_id.to_string();
        runtime.spawn(async move {
            registry.remove(&prompt_id).await;
        });
    }

    pub async fn contains(&self, prompt_id: &str) -> bool {
        self.jobs.lock().await.contains_key(prompt_id)
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }
}
