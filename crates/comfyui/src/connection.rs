//! Push channel lifecycle.
//!
//! [`ConnectionManager`] owns at most one WebSocket listener task. The
//! channel is opened on demand, reopened when the previous listener has
//! exited and never closed while jobs are pending unless forced.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::GenerationBackend;
use crate::client::ComfyUIClient;
use crate::dispatcher::EventDispatcher;
use crate::error::GenerationError;
use crate::events::{EventSender, GenerationEvent};
use crate::registry::PendingJobRegistry;

/// How long [`ConnectionManager::close`] waits for the listener to exit.
const LISTENER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// A running listener task.
struct ChannelHandle {
    task: JoinHandle<()>,
    cancel: CancellationToken,
}

impl ChannelHandle {
    fn is_alive(&self) -> bool {
        !self.task.is_finished() && !self.cancel.is_cancelled()
    }
}

pub struct ConnectionManager {
    client: ComfyUIClient,
    backend: Arc<dyn GenerationBackend>,
    dispatcher: EventDispatcher,
    registry: Arc<PendingJobRegistry>,
    event_tx: EventSender,
    open_timeout: Duration,
    channel: Mutex<Option<ChannelHandle>>,
}

impl ConnectionManager {
    pub fn new(
        client: ComfyUIClient,
        backend: Arc<dyn GenerationBackend>,
        dispatcher: EventDispatcher,
        registry: Arc<PendingJobRegistry>,
        event_tx: EventSender,
        open_timeout: Duration,
    ) -> Self {
        Self {
            client,
            backend,
            dispatcher,
            registry,
            event_tx,
            open_timeout,
            channel: Mutex::new(None),
        }
    }

    pub fn client_id(&self) -> &str {
        self.client.client_id()
    }

    /// Make sure a listener is running, opening the channel if needed.
    ///
    /// Probes the server first; an unreachable server leaves any existing
    /// channel state untouched.
    pub async fn ensure_connected(&self) -> Result<(), GenerationError> {
        let mut channel = self.channel.lock().await;
        if channel.as_ref().is_some_and(ChannelHandle::is_alive) {
            return Ok(());
        }

        if let Err(e) = self.backend.check_reachable().await {
            tracing::warn!(
                api_url = %self.backend.api_url(),
                error = %e,
                "ComfyUI server unreachable",
            );
            return Err(GenerationError::ServerUnreachable {
                url: self.backend.api_url().to_string(),
                reason: e.to_string(),
            });
        }

        if let Some(stale) = channel.take() {
            tracing::info!(
                client_id = %self.client.client_id(),
                "Discarding stale push channel listener",
            );
            stale.cancel.cancel();
            stale.task.abort();
        }

        let conn = match tokio::time::timeout(self.open_timeout, self.client.connect()).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Push channel handshake failed");
                return Err(GenerationError::ChannelTimeout(e.to_string()));
            }
            Err(_) => {
                tracing::warn!(timeout = ?self.open_timeout, "Push channel handshake timed out");
                return Err(GenerationError::ChannelTimeout(format!(
                    "handshake with {} did not complete within {:?}",
                    self.client.ws_url(),
                    self.open_timeout
                )));
            }
        };

        let cancel = CancellationToken::new();
        let task = self.spawn_listener(conn.ws_stream, conn.client_id, cancel.clone());
        *channel = Some(ChannelHandle { task, cancel });
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.channel
            .lock()
            .await
            .as_ref()
            .is_some_and(ChannelHandle::is_alive)
    }

    /// Stop the listener.
    ///
    /// Refuses with [`GenerationError::ChannelBusy`] while jobs are pending
    /// unless `force` is set (full shutdown).
    pub async fn close(&self, force: bool) -> Result<(), GenerationError> {
        let mut channel = self.channel.lock().await;
        let pending = self.registry.len().await;
        if pending > 0 && !force {
            return Err(GenerationError::ChannelBusy { pending });
        }

        let Some(handle) = channel.take() else {
            return Ok(());
        };
        drop(channel);
        handle.cancel.cancel();
        if tokio::time::timeout(LISTENER_STOP_TIMEOUT, handle.task)
            .await
            .is_err()
        {
            tracing::warn!("Push channel listener did not stop in time");
        }
        tracing::info!(pending, "Push channel closed");
        Ok(())
    }

    // ---- private helpers ----

    fn spawn_listener(
        &self,
        stream: crate::client::ComfyUIStream,
        client_id: String,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let dispatcher = self.dispatcher.clone();
        let event_tx = self.event_tx.clone();

        let _ = event_tx.send(GenerationEvent::ChannelConnected {
            client_id: client_id.clone(),
        });

        tokio::spawn(async move {
            tracing::info!(client_id = %client_id, "Push channel listener started");
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(client_id = %client_id, "Push channel listener cancelled");
                }
                _ = dispatcher.run(stream) => {
                    tracing::warn!(client_id = %client_id, "Push channel dropped");
                }
            }
            let _ = event_tx.send(GenerationEvent::ChannelDisconnected { client_id });
        })
    }
}
