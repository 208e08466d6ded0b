//! ComfyUI WebSocket message types and parser.
//!
//! ComfyUI sends JSON messages over WebSocket with the shape
//! `{"type": "<kind>", "data": {...}}`. This module deserializes them
//! into a strongly-typed [`ComfyUIMessage`] enum.

use serde::Deserialize;

use crate::registry::ArtifactRef;

/// All ComfyUI WebSocket message types the client reacts to.
///
/// Deserialized via the adjacently-tagged `"type"` field with associated
/// `"data"` content.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ComfyUIMessage {
    /// Server status broadcast (queue depth, etc.).
    #[serde(rename = "status")]
    Status(StatusData),

    /// A prompt has started executing.
    #[serde(rename = "execution_start")]
    ExecutionStart(PromptRef),

    /// Some nodes were skipped because their outputs are cached.
    #[serde(rename = "execution_cached")]
    ExecutionCached(ExecutionCachedData),

    /// A specific node is currently executing (or execution finished when `node` is `None`).
    #[serde(rename = "executing")]
    Executing(ExecutingData),

    /// Progress update from a long-running node (e.g. KSampler).
    #[serde(rename = "progress")]
    Progress(ProgressData),

    /// A node has finished and produced output.
    #[serde(rename = "executed")]
    Executed(ExecutedData),

    /// Every node of the prompt ran to completion (newer servers).
    #[serde(rename = "execution_success")]
    ExecutionSuccess(PromptRef),

    /// Execution failed with an error.
    #[serde(rename = "execution_error")]
    ExecutionError(ErrorData),

    /// Execution was stopped through `/interrupt`.
    #[serde(rename = "execution_interrupted")]
    ExecutionInterrupted(InterruptedData),
}

impl ComfyUIMessage {
    /// Correlation id carried by the message, if any.
    pub fn prompt_id(&self) -> Option<&str> {
        match self {
            ComfyUIMessage::Status(_) => None,
            ComfyUIMessage::ExecutionStart(d) | ComfyUIMessage::ExecutionSuccess(d) => {
                Some(&d.prompt_id)
            }
            ComfyUIMessage::ExecutionCached(d) => Some(&d.prompt_id),
            ComfyUIMessage::Executing(d) => d.prompt_id.as_deref(),
            ComfyUIMessage::Progress(d) => d.prompt_id.as_deref(),
            ComfyUIMessage::Executed(d) => Some(&d.prompt_id),
            ComfyUIMessage::ExecutionError(d) => Some(&d.prompt_id),
            ComfyUIMessage::ExecutionInterrupted(d) => Some(&d.prompt_id),
        }
    }
}

/// Queue status information.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusData {
    pub status: QueueStatus,
}

/// Current queue state.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueStatus {
    pub exec_info: ExecInfo,
}

/// Execution queue statistics.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecInfo {
    pub queue_remaining: i32,
}

/// Payload that only names the prompt.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptRef {
    pub prompt_id: String,
}

/// Payload for `execution_cached` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionCachedData {
    pub prompt_id: String,
    /// Node IDs whose outputs were served from cache.
    #[serde(default)]
    pub nodes: Vec<String>,
}

/// Payload for `executing` messages.
///
/// When `node` is `None`, execution of the prompt has completed.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutingData {
    pub node: Option<String>,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

/// Payload for `progress` messages (step-level progress within a node).
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressData {
    /// Current step number.
    pub value: i32,
    /// Total number of steps.
    pub max: i32,
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
}

impl ProgressData {
    /// Completion percentage (0-100).
    pub fn percent(&self) -> i16 {
        if self.max > 0 {
            ((self.value as f64 / self.max as f64) * 100.0).clamp(0.0, 100.0) as i16
        } else {
            0
        }
    }
}

/// Payload for `executed` messages (node output).
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutedData {
    /// The node that produced this output.
    pub node: String,
    /// Raw output value (images, filenames, etc.).
    pub output: serde_json::Value,
    pub prompt_id: String,
}

impl ExecutedData {
    /// First image of the node output, if the node produced images.
    pub fn first_image(&self) -> Option<ArtifactRef> {
        let images = self.output.get("images")?.as_array()?;
        images
            .iter()
            .find_map(|image| serde_json::from_value::<ArtifactRef>(image.clone()).ok())
    }
}

/// Payload for `execution_error` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorData {
    pub prompt_id: String,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub node_type: Option<String>,
    pub exception_message: String,
    #[serde(default)]
    pub exception_type: String,
    #[serde(default)]
    pub traceback: Vec<String>,
}

/// Payload for `execution_interrupted` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct InterruptedData {
    pub prompt_id: String,
    #[serde(default)]
    pub node_id: Option<String>,
}

/// Parse a ComfyUI WebSocket text message into a typed enum.
///
/// Returns `Err` for malformed JSON or unknown `type` values.
/// Callers should log unknown types and continue.
pub fn parse_message(text: &str) -> Result<ComfyUIMessage, serde_json::Error> {
    serde_json::from_str(text)
}
