//! Waiting for a submitted job to reach a terminal state.
//!
//! The waiter polls the pending-job registry at a fixed interval:
//!
//! ```text
//! Submitted --completed--> Running --artifact--> ArtifactFound
//!     |                       |
//!     +-----artifact----------+--> ArtifactFound
//!     +-----error-------------+--> Errored
//!     +-----hard timeout------+--> TimedOut (grace expiry while Running)
//!     +-----cancel------------+--> Cancelled
//! ```
//!
//! Whatever the outcome, the registry entry is removed before the result
//! is handed back. Dropping the wait future (an outer `timeout`, an
//! aborted task) removes it as well.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::api::GenerationBackend;
use crate::error::GenerationError;
use crate::events::{EventSender, GenerationEvent};
use crate::registry::{ArtifactRef, PendingJobRegistry};

/// Time budgets of a single wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitConfig {
    /// Sleep between registry checks.
    pub poll_interval: Duration,
    /// How long an artifact may lag behind the completion signal.
    pub completion_grace: Duration,
    /// Absolute ceiling measured from the start of the wait.
    pub hard_timeout: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            completion_grace: Duration::from_secs(10),
            hard_timeout: Duration::from_secs(180),
        }
    }
}

/// Position of a job in the wait state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    Submitted,
    /// The graph finished; waiting for the artifact announcement.
    Running,
    ArtifactFound,
    Errored,
    TimedOut,
    Cancelled,
}

/// A downloaded output image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub artifact_ref: ArtifactRef,
    pub bytes: Vec<u8>,
}

pub struct ResultWaiter {
    backend: Arc<dyn GenerationBackend>,
    registry: Arc<PendingJobRegistry>,
    event_tx: EventSender,
    config: WaitConfig,
    /// Client-wide token; cancelling it aborts every wait.
    shutdown: CancellationToken,
}

impl ResultWaiter {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        registry: Arc<PendingJobRegistry>,
        event_tx: EventSender,
        config: WaitConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            backend,
            registry,
            event_tx,
            config,
            shutdown,
        }
    }

    pub fn config(&self) -> WaitConfig {
        self.config
    }

    /// Wait for `prompt_id` to finish and download its artifact.
    pub async fn wait(
        &self,
        prompt_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Artifact, GenerationError> {
        let entry = EntryGuard::new(Arc::clone(&self.registry), prompt_id);
        if !self.registry.contains(prompt_id).await {
            entry.release().await;
            return Err(GenerationError::UnknownJob(prompt_id.to_string()));
        }

        let (state, outcome) = self.run(prompt_id, cancel).await;
        entry.release().await;

        match &outcome {
            Ok(artifact) => {
                tracing::info!(
                    prompt_id,
                    filename = %artifact.artifact_ref.filename,
                    bytes = artifact.bytes.len(),
                    "Artifact fetched",
                );
            }
            Err(e) => {
                tracing::warn!(prompt_id, state = ?state, error = %e, "Job ended without artifact");
            }
        }

        if state == WaitState::Cancelled {
            self.cancel_on_server(prompt_id);
        }
        outcome
    }

    // ---- state machine ----

    async fn run(
        &self,
        prompt_id: &str,
        cancel: &CancellationToken,
    ) -> (WaitState, Result<Artifact, GenerationError>) {
        let hard_deadline = Instant::now() + self.config.hard_timeout;
        let mut grace_deadline: Option<Instant> = None;
        let mut state = WaitState::Submitted;

        loop {
            if self.is_cancelled(cancel) {
                return cancelled(prompt_id);
            }

            let Some(job) = self.registry.snapshot(prompt_id).await else {
                return (
                    WaitState::Errored,
                    Err(GenerationError::UnknownJob(prompt_id.to_string())),
                );
            };

            if let Some(detail) = job.error {
                return (
                    WaitState::Errored,
                    Err(GenerationError::ExecutionError {
                        prompt_id: prompt_id.to_string(),
                        detail,
                    }),
                );
            }

            if let Some(artifact_ref) = job.artifact_ref {
                return self.fetch(prompt_id, artifact_ref, cancel).await;
            }

            let now = Instant::now();
            if job.completed && state == WaitState::Submitted {
                tracing::debug!(prompt_id, "Job completed, waiting for artifact");
                state = WaitState::Running;
                grace_deadline = Some(now + self.config.completion_grace);
            }

            if grace_deadline.is_some_and(|deadline| now >= deadline) {
                return (
                    WaitState::TimedOut,
                    Err(GenerationError::ArtifactTimeout {
                        prompt_id: prompt_id.to_string(),
                    }),
                );
            }
            if now >= hard_deadline {
                let err = if state == WaitState::Running {
                    GenerationError::ArtifactTimeout {
                        prompt_id: prompt_id.to_string(),
                    }
                } else {
                    GenerationError::HardTimeout {
                        prompt_id: prompt_id.to_string(),
                    }
                };
                return (WaitState::TimedOut, Err(err));
            }

            let mut wake = (now + self.config.poll_interval).min(hard_deadline);
            if let Some(deadline) = grace_deadline {
                wake = wake.min(deadline);
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return cancelled(prompt_id),
                _ = self.shutdown.cancelled() => return cancelled(prompt_id),
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }

    async fn fetch(
        &self,
        prompt_id: &str,
        artifact_ref: ArtifactRef,
        cancel: &CancellationToken,
    ) -> (WaitState, Result<Artifact, GenerationError>) {
        tracing::debug!(prompt_id, filename = %artifact_ref.filename, "Fetching artifact");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return cancelled(prompt_id),
            _ = self.shutdown.cancelled() => return cancelled(prompt_id),
            result = self.backend.fetch_artifact(&artifact_ref) => result,
        };

        match result {
            Ok(bytes) => (
                WaitState::ArtifactFound,
                Ok(Artifact {
                    artifact_ref,
                    bytes,
                }),
            ),
            Err(e) => (
                WaitState::Errored,
                Err(GenerationError::ArtifactFetchFailed {
                    prompt_id: prompt_id.to_string(),
                    reason: e.to_string(),
                }),
            ),
        }
    }

    // ---- private helpers ----

    fn is_cancelled(&self, cancel: &CancellationToken) -> bool {
        cancel.is_cancelled() || self.shutdown.is_cancelled()
    }

    /// Ask the server to drop the job without delaying the caller.
    fn cancel_on_server(&self, prompt_id: &str) {
        let _ = self.event_tx.send(GenerationEvent::Cancelled {
            prompt_id: prompt_id.to_string(),
        });

        let backend = Arc::clone(&self.backend);
        let prompt_id = prompt_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = backend.cancel_execution(&prompt_id).await {
                tracing::debug!(prompt_id = %prompt_id, error = %e, "Server-side cancel failed");
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Registry entry guard
// ---------------------------------------------------------------------------

/// Removes a job's registry entry when the wait ends, however it ends.
struct EntryGuard {
    registry: Arc<PendingJobRegistry>,
    /// `None` once the entry has been removed.
    prompt_id: Option<String>,
}

impl EntryGuard {
    fn new(registry: Arc<PendingJobRegistry>, prompt_id: &str) -> Self {
        Self {
            registry,
            prompt_id: Some(prompt_id.to_string()),
        }
    }

    async fn release(mut self) {
        if let Some(prompt_id) = self.prompt_id.as_deref() {
            self.registry.remove(prompt_id).await;
        }
        self.prompt_id = None;
    }
}

impl Drop for EntryGuard {
    fn drop(&mut self) {
        if let Some(prompt_id) = self.prompt_id.take() {
            tracing::debug!(prompt_id = %prompt_id, "Wait abandoned, removing pending job");
            self.registry.remove_detached(&prompt_id);
        }
    }
}

fn cancelled(prompt_id: &str) -> (WaitState, Result<Artifact, GenerationError>) {
    (
        WaitState::Cancelled,
        Err(GenerationError::Cancelled {
            prompt_id: prompt_id.to_string(),
        }),
    )
}
