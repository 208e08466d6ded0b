//! Client events broadcast to interested listeners (UI progress bars,
//! logs).
//!
//! Events are informational. Waiting for a job never depends on them;
//! the pending-job registry is the source of truth.

use serde::Serialize;
use tokio::sync::broadcast;

/// Broadcast channel capacity for client events.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A client-level event derived from push channel traffic.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GenerationEvent {
    /// The push channel was opened.
    ChannelConnected { client_id: String },

    /// The push channel closed or failed.
    ChannelDisconnected { client_id: String },

    /// A job made progress (step N of M).
    Progress {
        prompt_id: Option<String>,
        /// Completion percentage (0-100).
        percent: i16,
        /// The node currently executing, if known.
        current_node: Option<String>,
    },

    /// The graph finished running.
    ExecutionCompleted { prompt_id: String },

    /// An output image was announced.
    ArtifactReady { prompt_id: String, filename: String },

    /// A job failed on the server.
    ExecutionFailed { prompt_id: String, error: String },

    /// The caller gave up on a job.
    Cancelled { prompt_id: String },
}

pub type EventSender = broadcast::Sender<GenerationEvent>;

pub fn event_channel() -> EventSender {
    let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    tx
}
