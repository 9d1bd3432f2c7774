//! Fixed-backoff reconnection for a ComfyUI WebSocket session.
//!
//! Only an already-established session is ever reconnected. Before each
//! attempt the HTTP root is checked once: a dropped socket on a live
//! server is worth retrying, a dead server is not.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::api::ComfyUIApi;
use crate::client::{ComfyUIClient, ComfyUIConnection};

/// Tunable parameters for the reconnection procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Maximum number of socket open attempts.
    pub max_attempts: u32,
    /// Pause after each failed attempt.
    pub delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(3),
        }
    }
}

/// Why a reconnection gave up.
#[derive(Debug, thiserror::Error)]
pub enum ReconnectError {
    /// The HTTP root stopped answering; the server itself is gone.
    #[error("ComfyUI HTTP unreachable during websocket reconnect: {0}")]
    ServerUnreachable(String),

    /// Every attempt failed.
    #[error("Failed to reconnect after {attempts} attempts. Last error: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    /// The job was cancelled while reconnecting.
    #[error("Reconnect cancelled")]
    Cancelled,
}

/// Re-open the event stream for `client_id`.
///
/// `last_error` describes the failure that ended the previous socket and
/// is reported if no attempt succeeds.
pub async fn reconnect(
    client: &ComfyUIClient,
    api: &ComfyUIApi,
    client_id: &str,
    config: &ReconnectConfig,
    last_error: String,
    cancel: &CancellationToken,
) -> Result<ComfyUIConnection, ReconnectError> {
    tracing::warn!(
        client_id = %client_id,
        error = %last_error,
        "WebSocket connection closed unexpectedly, attempting to reconnect",
    );
    let mut last_error = last_error;

    for attempt in 1..=config.max_attempts {
        if let Err(e) = api.ping().await {
            tracing::error!(error = %e, "ComfyUI HTTP unreachable, aborting websocket reconnect");
            return Err(ReconnectError::ServerUnreachable(e.to_string()));
        }

        tracing::info!(
            client_id = %client_id,
            attempt,
            max_attempts = config.max_attempts,
            "Reconnecting to ComfyUI",
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(client_id = %client_id, "Reconnect cancelled");
                return Err(ReconnectError::Cancelled);
            }
            result = client.connect(client_id) => {
                match result {
                    Ok(conn) => {
                        tracing::info!(client_id = %client_id, attempt, "Reconnected to ComfyUI");
                        return Ok(conn);
                    }
                    Err(e) => {
                        tracing::warn!(
                            client_id = %client_id,
                            error = %e,
                            "Reconnect attempt {attempt} failed",
                        );
                        last_error = e.to_string();
                    }
                }
            }
        }

        // Wait before the next attempt, respecting cancellation.
        tokio::select! {
            _ = cancel.cancelled() => return Err(ReconnectError::Cancelled),
            _ = tokio::time::sleep(config.delay) => {}
        }
    }

    Err(ReconnectError::Exhausted {
        attempts: config.max_attempts,
        last_error,
    })
}
