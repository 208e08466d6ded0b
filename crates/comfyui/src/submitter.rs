//! Job submission.

use std::sync::Arc;

use zeniji_core::graph::JobGraph;
use zeniji_core::types::PromptId;

use crate::api::GenerationBackend;
use crate::error::GenerationError;
use crate::registry::PendingJobRegistry;

/// Posts mutated job graphs and registers the returned correlation ids.
pub struct JobSubmitter {
    backend: Arc<dyn GenerationBackend>,
    registry: Arc<PendingJobRegistry>,
    client_id: String,
}

impl JobSubmitter {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        registry: Arc<PendingJobRegistry>,
        client_id: String,
    ) -> Self {
        Self {
            backend,
            registry,
            client_id,
        }
    }

    /// Queue `graph` on the server.
    ///
    /// A fresh pending entry exists for the returned id before this
    /// returns. A rejected submission leaves the registry untouched.
    pub async fn submit(&self, graph: &JobGraph) -> Result<PromptId, GenerationError> {
        let response = self
            .backend
            .submit_workflow(&graph.to_value(), &self.client_id)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Workflow submission failed");
                GenerationError::submission(e)
            })?;

        self.registry.register(&response.prompt_id).await;

        tracing::info!(
            prompt_id = %response.prompt_id,
            queue_position = response.number,
            nodes = graph.len(),
            "Workflow submitted to ComfyUI",
        );

        Ok(response.prompt_id)
    }
}
