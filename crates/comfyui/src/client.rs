//! WebSocket client for connecting to a ComfyUI instance.
//!
//! [`ComfyUIClient`] holds the push channel address and the client
//! session token. Call [`ComfyUIClient::connect`] to establish a live
//! [`ComfyUIConnection`] over WebSocket.

use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Raw WebSocket stream type used by the push channel.
pub type ComfyUIStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Connection configuration for one ComfyUI instance.
///
/// The `client_id` is generated once and reused for every (re)connect so
/// that the server keeps addressing messages to this client.
pub struct ComfyUIClient {
    ws_url: String,
    client_id: String,
}

/// A live WebSocket connection to a ComfyUI instance.
pub struct ComfyUIConnection {
    /// Client session token sent during the WebSocket handshake.
    pub client_id: String,
    /// The raw WebSocket stream for reading/writing frames.
    pub ws_stream: ComfyUIStream,
}

impl ComfyUIClient {
    /// Create a new client with a fresh UUID v4 session token.
    ///
    /// * `ws_url` - WebSocket base URL, e.g. `ws://host:8000`.
    pub fn new(ws_url: String) -> Self {
        Self::with_client_id(ws_url, uuid::Uuid::new_v4().to_string())
    }

    pub fn with_client_id(ws_url: String, client_id: String) -> Self {
        Self {
            ws_url: ws_url.trim_end_matches('/').to_string(),
            client_id,
        }
    }

    /// WebSocket base URL (e.g. `ws://host:8000`).
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Full handshake URL including the session token.
    pub fn endpoint(&self) -> String {
        format!("{}/ws?clientId={}", self.ws_url, self.client_id)
    }

    /// Connect to the ComfyUI WebSocket endpoint.
    pub async fn connect(&self) -> Result<ComfyUIConnection, ComfyUIClientError> {
        let url = self.endpoint();

        let (ws_stream, _response) = connect_async(&url).await.map_err(|e| {
            ComfyUIClientError::Connection(format!(
                "Failed to connect to ComfyUI at {}: {e}",
                self.ws_url
            ))
        })?;

        tracing::info!(
            client_id = %self.client_id,
            "Connected to ComfyUI at {}",
            self.ws_url,
        );

        Ok(ComfyUIConnection {
            client_id: self.client_id.clone(),
            ws_stream,
        })
    }
}

/// Errors that can occur when working with the WebSocket client.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIClientError {
    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),
}
