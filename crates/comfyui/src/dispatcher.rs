//! Push channel message processing.
//!
//! [`EventDispatcher`] is the only reader of the WebSocket. It parses
//! every text frame into a [`ComfyUIMessage`], updates the matching
//! [`PendingJob`](crate::registry::PendingJob) and emits informational
//! [`GenerationEvent`]s. Messages for prompt ids that are not registered
//! (timed out, or queued by another client) are dropped.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::events::{EventSender, GenerationEvent};
use crate::messages::{
    parse_message, ComfyUIMessage, ErrorData, ExecutedData, ExecutingData, InterruptedData,
    ProgressData,
};
use crate::registry::{ErrorCategory, ErrorDetail, PendingJobRegistry};

/// Routes push messages into the pending-job registry.
#[derive(Clone)]
pub struct EventDispatcher {
    registry: Arc<PendingJobRegistry>,
    event_tx: EventSender,
}

impl EventDispatcher {
    pub fn new(registry: Arc<PendingJobRegistry>, event_tx: EventSender) -> Self {
        Self { registry, event_tx }
    }

    /// Process WebSocket frames until the stream closes, yields a receive
    /// error, or is exhausted.
    ///
    /// Binary frames (preview images) are ignored.
    pub async fn run<S>(&self, mut stream: S)
    where
        S: Stream<Item = Result<Message, WsError>> + Unpin,
    {
        while let Some(msg_result) = stream.next().await {
            match msg_result {
                Ok(Message::Text(text)) => {
                    self.handle_text(&text).await;
                }
                Ok(Message::Binary(_)) => {
                    tracing::trace!("Ignoring binary message (preview image)");
                }
                Ok(Message::Ping(_) | Message::Pong(_)) => {
                    // Handled automatically by tungstenite.
                }
                Ok(Message::Close(frame)) => {
                    tracing::info!(?frame, "ComfyUI WebSocket closed");
                    break;
                }
                Ok(Message::Frame(_)) => {}
                Err(e) => {
                    tracing::error!(error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    }

    /// Parse and dispatch a single text frame.
    pub async fn handle_text(&self, text: &str) {
        match parse_message(text) {
            Ok(msg) => self.dispatch(msg).await,
            Err(e) => {
                tracing::debug!(
                    error = %e,
                    raw_message = %text,
                    "Skipping unrecognised ComfyUI message",
                );
            }
        }
    }

    /// Apply one typed message to the registry.
    pub async fn dispatch(&self, msg: ComfyUIMessage) {
        match msg {
            ComfyUIMessage::Progress(data) => self.handle_progress(&data),
            ComfyUIMessage::Executing(data) => self.handle_executing(&data).await,
            ComfyUIMessage::ExecutionSuccess(data) => {
                self.handle_completed(&data.prompt_id).await;
            }
            ComfyUIMessage::Executed(data) => self.handle_executed(&data).await,
            ComfyUIMessage::ExecutionError(data) => self.handle_execution_error(&data).await,
            ComfyUIMessage::ExecutionInterrupted(data) => self.handle_interrupted(&data).await,
            ComfyUIMessage::ExecutionStart(data) => {
                tracing::debug!(prompt_id = %data.prompt_id, "Execution started");
            }
            ComfyUIMessage::ExecutionCached(data) => {
                tracing::debug!(
                    prompt_id = %data.prompt_id,
                    cached_nodes = data.nodes.len(),
                    "Execution used cache",
                );
            }
            ComfyUIMessage::Status(data) => {
                tracing::debug!(
                    queue_remaining = data.status.exec_info.queue_remaining,
                    "ComfyUI queue status",
                );
            }
        }
    }

    // ---- individual message handlers ----

    fn handle_progress(&self, data: &ProgressData) {
        let percent = data.percent();
        tracing::debug!(
            prompt_id = ?data.prompt_id,
            value = data.value,
            max = data.max,
            percent,
            "Generation progress",
        );
        let _ = self.event_tx.send(GenerationEvent::Progress {
            prompt_id: data.prompt_id.clone(),
            percent,
            current_node: data.node.clone(),
        });
    }

    async fn handle_executing(&self, data: &ExecutingData) {
        let Some(prompt_id) = data.prompt_id.as_deref() else {
            return;
        };
        match data.node {
            Some(ref node) => {
                tracing::trace!(prompt_id, node = %node, "Executing node");
            }
            // node == None means execution is complete for this prompt.
            None => self.handle_completed(prompt_id).await,
        }
    }

    async fn handle_completed(&self, prompt_id: &str) {
        if !self.registry.mark_completed(prompt_id).await {
            tracing::debug!(prompt_id, "Completion for unknown prompt dropped");
            return;
        }
        tracing::info!(prompt_id, "Execution completed (all nodes done)");
        let _ = self.event_tx.send(GenerationEvent::ExecutionCompleted {
            prompt_id: prompt_id.to_string(),
        });
    }

    async fn handle_executed(&self, data: &ExecutedData) {
        let Some(image) = data.first_image() else {
            tracing::trace!(
                prompt_id = %data.prompt_id,
                node = %data.node,
                "Node output without images",
            );
            return;
        };
        let filename = image.filename.clone();

        if self.registry.record_artifact(&data.prompt_id, image).await {
            tracing::info!(
                prompt_id = %data.prompt_id,
                node = %data.node,
                filename = %filename,
                "Image saved",
            );
            let _ = self.event_tx.send(GenerationEvent::ArtifactReady {
                prompt_id: data.prompt_id.clone(),
                filename,
            });
        } else {
            tracing::debug!(
                prompt_id = %data.prompt_id,
                node = %data.node,
                "Artifact ignored (unknown prompt or already recorded)",
            );
        }
    }

    async fn handle_execution_error(&self, data: &ErrorData) {
        let category = ErrorCategory::classify(&data.exception_type, &data.exception_message);
        let raw_detail = if data.traceback.is_empty() && data.exception_type.is_empty() {
            None
        } else {
            Some(format!(
                "{} (node {} {}): {}",
                data.exception_type,
                data.node_id.as_deref().unwrap_or("?"),
                data.node_type.as_deref().unwrap_or(""),
                data.traceback.join("")
            ))
        };
        let detail = ErrorDetail {
            category,
            message: data.exception_message.clone(),
            raw_detail,
        };

        if self.registry.record_error(&data.prompt_id, detail).await {
            tracing::error!(
                prompt_id = %data.prompt_id,
                node_id = ?data.node_id,
                error_type = %data.exception_type,
                error_message = %data.exception_message,
                category = category.as_str(),
                "Execution error",
            );
            let _ = self.event_tx.send(GenerationEvent::ExecutionFailed {
                prompt_id: data.prompt_id.clone(),
                error: data.exception_message.clone(),
            });
        } else {
            tracing::debug!(prompt_id = %data.prompt_id, "Error for unknown prompt dropped");
        }
    }

    async fn handle_interrupted(&self, data: &InterruptedData) {
        let detail = ErrorDetail {
            category: ErrorCategory::Interrupted,
            message: "execution interrupted".to_string(),
            raw_detail: data
                .node_id
                .as_ref()
                .map(|node| format!("interrupted at node {node}")),
        };
        if self.registry.record_error(&data.prompt_id, detail).await {
            tracing::warn!(prompt_id = %data.prompt_id, "Execution interrupted");
            let _ = self.event_tx.send(GenerationEvent::ExecutionFailed {
                prompt_id: data.prompt_id.clone(),
                error: "execution interrupted".to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event_channel;

    fn dispatcher() -> (Arc<PendingJobRegistry>, EventDispatcher) {
        let registry = Arc::new(PendingJobRegistry::new());
        let dispatcher = EventDispatcher::new(Arc::clone(&registry), event_channel());
        (registry, dispatcher)
    }

    #[tokio::test]
    async fn executing_null_marks_completed() {
        let (registry, dispatcher) = dispatcher();
        registry.register("p1").await;

        dispatcher
            .handle_text(r#"{"type":"executing","data":{"node":"3","prompt_id":"p1"}}"#)
            .await;
        assert!(!registry.snapshot("p1").await.unwrap().completed);

        dispatcher
            .handle_text(r#"{"type":"executing","data":{"node":null,"prompt_id":"p1"}}"#)
            .await;
        assert!(registry.snapshot("p1").await.unwrap().completed);
    }

    #[tokio::test]
    async fn progress_is_not_persisted_but_broadcast() {
        let registry = Arc::new(PendingJobRegistry::new());
        let tx = event_channel();
        let mut rx = tx.subscribe();
        let dispatcher = EventDispatcher::new(Arc::clone(&registry), tx);
        registry.register("p1").await;

        dispatcher
            .handle_text(r#"{"type":"progress","data":{"value":3,"max":9,"prompt_id":"p1"}}"#)
            .await;

        let job = registry.snapshot("p1").await.unwrap();
        assert!(!job.completed && job.artifact_ref.is_none() && job.error.is_none());
        assert_eq!(
            rx.recv().await.unwrap(),
            GenerationEvent::Progress {
                prompt_id: Some("p1".into()),
                percent: 33,
                current_node: None,
            }
        );
    }

    #[tokio::test]
    async fn unknown_prompt_is_dropped() {
        let (registry, dispatcher) = dispatcher();
        dispatcher
            .handle_text(r#"{"type":"executed","data":{"node":"9","output":{"images":[{"filename":"x.png"}]},"prompt_id":"other"}}"#)
            .await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn interrupted_records_interrupted_error() {
        let (registry, dispatcher) = dispatcher();
        registry.register("p1").await;
        dispatcher
            .handle_text(r#"{"type":"execution_interrupted","data":{"prompt_id":"p1","node_id":"3"}}"#)
            .await;
        let error = registry.snapshot("p1").await.unwrap().error.unwrap();
        assert_eq!(error.category, ErrorCategory::Interrupted);
    }

    #[tokio::test]
    async fn run_stops_on_close_frame() {
        let (registry, dispatcher) = dispatcher();
        registry.register("p1").await;

        let frames = vec![
            Ok(Message::Text(
                r#"{"type":"executing","data":{"node":null,"prompt_id":"p1"}}"#.into(),
            )),
            Ok(Message::Binary(vec![1, 2, 3].into())),
            Ok(Message::Close(None)),
            Ok(Message::Text(
                r#"{"type":"executed","data":{"node":"9","output":{"images":[{"filename":"late.png"}]},"prompt_id":"p1"}}"#.into(),
            )),
        ];
        dispatcher.run(futures::stream::iter(frames)).await;

        let job = registry.snapshot("p1").await.unwrap();
        assert!(job.completed);
        assert!(job.artifact_ref.is_none(), "frames after Close must not be read");
    }
}
