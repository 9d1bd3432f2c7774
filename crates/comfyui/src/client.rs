//! WebSocket client for connecting to a ComfyUI instance.
//!
//! [`ComfyUIClient`] holds the WebSocket base URL of one ComfyUI
//! instance. Call [`ComfyUIClient::connect`] with a session id to
//! establish a live [`ComfyUIConnection`] whose event stream is scoped
//! to that session.

use std::time::Duration;

use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Upper bound on the WebSocket handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// The concrete stream type produced by [`ComfyUIClient::connect`].
pub type ComfyUIStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Connection configuration for a ComfyUI instance.
pub struct ComfyUIClient {
    ws_url: String,
}

/// A live WebSocket connection to a ComfyUI instance.
pub struct ComfyUIConnection {
    /// Session id sent during the handshake as `clientId`.
    pub client_id: String,
    /// The raw WebSocket stream for reading/writing frames.
    pub ws_stream: ComfyUIStream,
}

impl ComfyUIClient {
    /// Create a new client targeting a specific ComfyUI instance.
    ///
    /// * `ws_url` - WebSocket base URL, e.g. `ws://127.0.0.1:8188`.
    pub fn new(ws_url: impl Into<String>) -> Self {
        let ws_url = ws_url.into().trim_end_matches('/').to_string();
        Self { ws_url }
    }

    /// Full event-stream URL for a session.
    pub fn socket_url(&self, client_id: &str) -> String {
        format!("{}/ws?clientId={}", self.ws_url, client_id)
    }

    /// Connect to the ComfyUI WebSocket endpoint for `client_id`.
    ///
    /// ComfyUI routes execution events for prompts submitted with the
    /// same `client_id` to this socket.
    pub async fn connect(&self, client_id: &str) -> Result<ComfyUIConnection, ComfyUIClientError> {
        let url = self.socket_url(client_id);

        let (ws_stream, _response) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(&url))
            .await
            .map_err(|_| ComfyUIClientError::Timeout(CONNECT_TIMEOUT))?
            .map_err(|e| {
                ComfyUIClientError::Connection(format!(
                    "Failed to connect to ComfyUI at {}: {e}",
                    self.ws_url
                ))
            })?;

        tracing::info!(client_id = %client_id, "Connected to ComfyUI at {}", self.ws_url);

        Ok(ComfyUIConnection {
            client_id: client_id.to_string(),
            ws_stream,
        })
    }
}

impl std::fmt::Debug for ComfyUIConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComfyUIConnection")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl ComfyUIConnection {
    /// Send a close frame and flush it. Errors are logged and swallowed:
    /// the stream is unusable afterwards either way.
    pub async fn close(&mut self) {
        if let Err(e) = self.ws_stream.close(None).await {
            tracing::debug!(client_id = %self.client_id, error = %e, "WebSocket close failed");
        } else {
            tracing::debug!(client_id = %self.client_id, "WebSocket closed");
        }
    }
}

/// Errors that can occur when working with the WebSocket client.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIClientError {
    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The handshake did not complete in time.
    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),
}
