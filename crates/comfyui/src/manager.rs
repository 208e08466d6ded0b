//! Portrait generation facade.
//!
//! [`PortraitClient`] wires the template store, role resolver, mutator,
//! push channel and registry together behind a single `render` call.
//! One instance owns one registry and one push channel; create it once
//! and share it through `Arc`.
//!
//! Client events are broadcast via a [`tokio::sync::broadcast`] channel.
//! Call [`PortraitClient::subscribe`] to receive them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use zeniji_core::graph::JobGraph;
use zeniji_core::mutator::{self, GenerationParams, MutationSummary};
use zeniji_core::prompt::ScenePrompt;
use zeniji_core::roles::resolve_roles;
use zeniji_core::template::TemplateStore;
use zeniji_core::types::PromptId;

use crate::api::{ComfyUIApi, ComfyUIApiError, GenerationBackend};
use crate::client::ComfyUIClient;
use crate::config::ComfyUIConfig;
use crate::connection::ConnectionManager;
use crate::dispatcher::EventDispatcher;
use crate::error::GenerationError;
use crate::events::{event_channel, EventSender, GenerationEvent};
use crate::registry::PendingJobRegistry;
use crate::submitter::JobSubmitter;
use crate::waiter::{Artifact, ResultWaiter};

pub struct PortraitClient {
    config: ComfyUIConfig,
    templates: TemplateStore,
    backend: Arc<dyn GenerationBackend>,
    registry: Arc<PendingJobRegistry>,
    event_tx: EventSender,
    dispatcher: EventDispatcher,
    connection: ConnectionManager,
    submitter: JobSubmitter,
    waiter: ResultWaiter,
    /// Master cancellation token, cancelled during shutdown.
    shutdown: CancellationToken,
    last_render: RwLock<Option<Duration>>,
}

impl PortraitClient {
    /// Client talking HTTP to the server named in `config`.
    pub fn new(config: ComfyUIConfig) -> Self {
        let api = ComfyUIApi::new(config.api_url(), config.probe_timeout);
        Self::with_backend(config, Arc::new(api))
    }

    /// Client using a caller-supplied backend for the HTTP side.
    pub fn with_backend(config: ComfyUIConfig, backend: Arc<dyn GenerationBackend>) -> Self {
        let registry = Arc::new(PendingJobRegistry::new());
        let event_tx = event_channel();
        let shutdown = CancellationToken::new();
        let dispatcher = EventDispatcher::new(Arc::clone(&registry), event_tx.clone());

        let client = ComfyUIClient::new(config.ws_url());
        let client_id = client.client_id().to_string();

        let connection = ConnectionManager::new(
            client,
            Arc::clone(&backend),
            dispatcher.clone(),
            Arc::clone(&registry),
            event_tx.clone(),
            config.channel_open_timeout,
        );
        let submitter = JobSubmitter::new(Arc::clone(&backend), Arc::clone(&registry), client_id);
        let waiter = ResultWaiter::new(
            Arc::clone(&backend),
            Arc::clone(&registry),
            event_tx.clone(),
            config.wait,
            shutdown.clone(),
        );

        Self {
            templates: TemplateStore::new(config.workflow_root.clone()),
            config,
            backend,
            registry,
            event_tx,
            dispatcher,
            connection,
            submitter,
            waiter,
            shutdown,
            last_render: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &ComfyUIConfig {
        &self.config
    }

    /// Subscribe to client events.
    pub fn subscribe(&self) -> broadcast::Receiver<GenerationEvent> {
        self.event_tx.subscribe()
    }

    /// Dispatcher feeding this client's registry. Push messages handed to
    /// it are processed exactly as if they arrived on the channel.
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    pub fn registry(&self) -> &Arc<PendingJobRegistry> {
        &self.registry
    }

    pub fn client_id(&self) -> &str {
        self.connection.client_id()
    }

    pub async fn ensure_connected(&self) -> Result<(), GenerationError> {
        self.connection.ensure_connected().await
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.is_connected().await
    }

    /// Close the push channel unless jobs are still pending.
    pub async fn close_channel(&self) -> Result<(), GenerationError> {
        self.connection.close(false).await
    }

    /// Load the configured style's template and write the prompt into it.
    pub fn prepare(&self, prompt: &str) -> Result<(JobGraph, MutationSummary), GenerationError> {
        let preset = self.config.style.preset();
        let params = preset.params_for(prompt, &self.config.render_options());
        self.prepare_with(&preset.workflow_path, &params)
    }

    /// Load `workflow_path`, resolve its roles and apply `params`.
    pub fn prepare_with(
        &self,
        workflow_path: &str,
        params: &GenerationParams,
    ) -> Result<(JobGraph, MutationSummary), GenerationError> {
        let mut graph = self.templates.load(workflow_path)?;
        let roles = resolve_roles(&graph)?;
        let summary = mutator::apply(&mut graph, &roles, params)?;

        tracing::debug!(
            workflow = workflow_path,
            positive_prompt_node = roles.positive_prompt(),
            seeds = ?summary.seeds,
            "Prepared job graph",
        );
        Ok((graph, summary))
    }

    /// Submit an already prepared graph.
    pub async fn submit(&self, graph: &JobGraph) -> Result<PromptId, GenerationError> {
        self.connection.ensure_connected().await?;
        self.submitter.submit(graph).await
    }

    pub async fn wait_for_result(
        &self,
        prompt_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Artifact, GenerationError> {
        self.waiter.wait(prompt_id, cancel).await
    }

    /// Render one portrait for `prompt` with the configured style.
    pub async fn render(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<Artifact, GenerationError> {
        let started = Instant::now();
        let result = self.render_inner(prompt, cancel).await;
        let elapsed = started.elapsed();
        *self.last_render.write().await = Some(elapsed);

        match &result {
            Ok(_) => tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "Portrait rendered"),
            Err(e) => tracing::warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                error = %e,
                "Portrait render failed",
            ),
        }
        result
    }

    /// Render the portrait for a scene description.
    pub async fn render_scene(
        &self,
        scene: &ScenePrompt,
        cancel: &CancellationToken,
    ) -> Result<Artifact, GenerationError> {
        self.render(&scene.assemble(), cancel).await
    }

    /// Wall-clock duration of the most recent render, successful or not.
    pub async fn last_render_duration(&self) -> Option<Duration> {
        *self.last_render.read().await
    }

    /// Remove a queued job from the server queue.
    pub async fn cancel(&self, prompt_id: &str) -> Result<(), ComfyUIApiError> {
        self.backend.cancel_execution(prompt_id).await?;
        tracing::info!(prompt_id, "Cancellation requested");
        Ok(())
    }

    /// Interrupt whatever the server is running right now.
    pub async fn interrupt(&self) -> Result<(), ComfyUIApiError> {
        self.backend.interrupt().await
    }

    pub async fn history(&self, prompt_id: &str) -> Result<serde_json::Value, ComfyUIApiError> {
        self.backend.get_history(prompt_id).await
    }

    /// Abort all waits and close the push channel.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down portrait client");
        self.shutdown.cancel();
        if let Err(e) = self.connection.close(true).await {
            tracing::warn!(error = %e, "Failed to close push channel");
        }
        tracing::info!("Portrait client shut down complete");
    }

    // ---- private helpers ----

    async fn render_inner(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<Artifact, GenerationError> {
        self.connection.ensure_connected().await?;
        let (graph, _) = self.prepare(prompt)?;
        let prompt_id = self.submitter.submit(&graph).await?;
        self.waiter.wait(&prompt_id, cancel).await
    }
}
