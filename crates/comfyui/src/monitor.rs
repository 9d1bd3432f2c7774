//! Execution monitor: waits for a submitted prompt to finish.
//!
//! Reads frames from a ComfyUI WebSocket session until the terminal
//! `executing` event (node `null`) or an `execution_error` for the
//! monitored prompt arrives. Transport failures on an established
//! session go through [`reconnect`](crate::reconnect::reconnect); since
//! ComfyUI does not replay events, the history endpoint is consulted
//! once after every reconnection in case the prompt finished during
//! the gap.

use futures::StreamExt;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::api::ComfyUIApi;
use crate::client::{ComfyUIClient, ComfyUIConnection};
use crate::history::parse_history;
use crate::messages::{parse_message, ComfyUIMessage};
use crate::reconnect::{reconnect, ReconnectConfig, ReconnectError};

/// Errors that end monitoring without a successful completion.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// ComfyUI reported an exception while running the prompt.
    #[error("Execution error: {0}")]
    ExecutionFailed(String),

    /// The session dropped and could not be re-established.
    #[error("Connection lost: {0}")]
    Reconnect(#[from] ReconnectError),

    /// The caller cancelled the job.
    #[error("Monitoring cancelled")]
    Cancelled,
}

/// What a single text frame means for the monitored prompt.
#[derive(Debug, PartialEq)]
enum Verdict {
    Pending,
    Completed,
    Failed(String),
}

/// Drives one prompt from submission to a terminal state.
pub struct ExecutionMonitor<'a> {
    client: &'a ComfyUIClient,
    api: &'a ComfyUIApi,
    reconnect: ReconnectConfig,
}

impl<'a> ExecutionMonitor<'a> {
    pub fn new(client: &'a ComfyUIClient, api: &'a ComfyUIApi, reconnect: ReconnectConfig) -> Self {
        Self {
            client,
            api,
            reconnect,
        }
    }

    /// Consume events from `conn` until `prompt_id` terminates.
    ///
    /// On reconnection the new socket replaces the one in `conn`, so the
    /// caller always holds the live session and can close it afterwards.
    pub async fn wait_for_completion(
        &self,
        conn: &mut ComfyUIConnection,
        prompt_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), MonitorError> {
        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => return Err(MonitorError::Cancelled),
                frame = conn.ws_stream.next() => frame,
            };

            let disconnect_reason = match frame {
                Some(Ok(Message::Text(text))) => match interpret(&text, prompt_id) {
                    Verdict::Pending => continue,
                    Verdict::Completed => {
                        tracing::info!(prompt_id = %prompt_id, "Execution finished");
                        return Ok(());
                    }
                    Verdict::Failed(message) => {
                        tracing::error!(prompt_id = %prompt_id, error = %message, "Execution error");
                        return Err(MonitorError::ExecutionFailed(message));
                    }
                },
                Some(Ok(Message::Binary(_))) => {
                    // ComfyUI sends binary messages for preview images.
                    tracing::trace!(prompt_id = %prompt_id, "Ignoring binary message (preview image)");
                    continue;
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(Message::Close(frame))) => format!("server closed the socket ({frame:?})"),
                Some(Err(e)) => e.to_string(),
                None => "stream ended".to_string(),
            };

            let client_id = conn.client_id.clone();
            *conn = reconnect(
                self.client,
                self.api,
                &client_id,
                &self.reconnect,
                disconnect_reason,
                cancel,
            )
            .await?;

            match self.check_history(prompt_id).await {
                Verdict::Pending => {}
                Verdict::Completed => {
                    tracing::info!(prompt_id = %prompt_id, "Execution finished while disconnected");
                    return Ok(());
                }
                Verdict::Failed(message) => {
                    tracing::error!(prompt_id = %prompt_id, error = %message, "Execution failed while disconnected");
                    return Err(MonitorError::ExecutionFailed(message));
                }
            }
        }
    }

    /// Look up the history record once; a present record means the
    /// prompt already reached a terminal state.
    async fn check_history(&self, prompt_id: &str) -> Verdict {
        let raw = match self.api.get_history(prompt_id).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(prompt_id = %prompt_id, error = %e, "History check after reconnect failed");
                return Verdict::Pending;
            }
        };
        match parse_history(prompt_id, &raw) {
            Ok(Some(record)) if record.is_error() => Verdict::Failed(
                record
                    .error_message()
                    .unwrap_or_else(|| "execution failed while the websocket was disconnected".into()),
            ),
            Ok(Some(_)) => Verdict::Completed,
            Ok(None) => Verdict::Pending,
            Err(e) => {
                tracing::warn!(prompt_id = %prompt_id, error = %e, "Ignoring malformed history record");
                Verdict::Pending
            }
        }
    }
}

/// Decide what a text frame means for `prompt_id`.
fn interpret(text: &str, prompt_id: &str) -> Verdict {
    let message = match parse_message(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(error = %e, raw_message = %text, "Failed to parse ComfyUI message");
            return Verdict::Pending;
        }
    };

    if message.prompt_id().is_some_and(|id| id != prompt_id) {
        return Verdict::Pending;
    }

    if message.is_completion_of(prompt_id) {
        return Verdict::Completed;
    }

    match message {
        ComfyUIMessage::Executing(data) => {
            if let Some(node) = data.node {
                tracing::debug!(prompt_id = %prompt_id, node = %node, "Executing node");
            }
            Verdict::Pending
        }
        ComfyUIMessage::Progress(data) => {
            tracing::debug!(prompt_id = %prompt_id, value = data.value, max = data.max, "Generation progress");
            Verdict::Pending
        }
        ComfyUIMessage::ExecutionError(data) if data.prompt_id.as_deref() == Some(prompt_id) => {
            Verdict::Failed(data.exception_message)
        }
        ComfyUIMessage::ExecutionError(_) => Verdict::Pending,
        ComfyUIMessage::Other(kind) => {
            tracing::trace!(kind = %kind, "Ignoring message");
            Verdict::Pending
        }
    }
}
