//! ComfyUI WebSocket message types and parser.
//!
//! ComfyUI sends JSON messages over WebSocket with the shape
//! `{"type": "<kind>", "data": {...}}`. The stream is shared with other
//! clients and new message kinds appear between ComfyUI releases, so
//! decoding is two-step: read the envelope, then decode `data` only for
//! the kinds the worker acts on. Everything else becomes
//! [`ComfyUIMessage::Other`].

use serde::Deserialize;

/// Message kinds the execution monitor distinguishes.
#[derive(Debug, Clone, PartialEq)]
pub enum ComfyUIMessage {
    /// A specific node is currently executing, or the whole prompt
    /// finished when `node` is `None`.
    Executing(ExecutingData),

    /// Progress update from a long-running node (e.g. KSampler).
    Progress(ProgressData),

    /// Execution failed with an error.
    ExecutionError(ErrorData),

    /// Any other message kind, kept by name for logging.
    Other(String),
}

/// Payload for `executing` messages.
///
/// When `node` is `None`, execution of the prompt has completed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExecutingData {
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

/// Payload for `progress` messages (step-level progress within a node).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProgressData {
    /// Current step number.
    pub value: i64,
    /// Total number of steps.
    pub max: i64,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

/// Payload for `execution_error` messages.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ErrorData {
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub exception_message: String,
    #[serde(default)]
    pub exception_type: Option<String>,
}

impl ComfyUIMessage {
    /// The prompt this message refers to, if it carries one.
    pub fn prompt_id(&self) -> Option<&str> {
        match self {
            Self::Executing(data) => data.prompt_id.as_deref(),
            Self::Progress(data) => data.prompt_id.as_deref(),
            Self::ExecutionError(data) => data.prompt_id.as_deref(),
            Self::Other(_) => None,
        }
    }

    /// `true` for the terminal `executing` event of `prompt_id`.
    pub fn is_completion_of(&self, prompt_id: &str) -> bool {
        matches!(self, Self::Executing(data)
            if data.node.is_none() && data.prompt_id.as_deref() == Some(prompt_id))
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Parse a ComfyUI WebSocket text message into a typed enum.
///
/// Unknown `type` values decode to [`ComfyUIMessage::Other`]. Returns
/// `Err` only for malformed JSON, a missing `type`, or a known kind
/// whose `data` does not match its shape.
pub fn parse_message(text: &str) -> Result<ComfyUIMessage, serde_json::Error> {
    let envelope: Envelope = serde_json::from_str(text)?;
    let message = match envelope.kind.as_str() {
        "executing" => ComfyUIMessage::Executing(serde_json::from_value(envelope.data)?),
        "progress" => ComfyUIMessage::Progress(serde_json::from_value(envelope.data)?),
        "execution_error" => ComfyUIMessage::ExecutionError(serde_json::from_value(envelope.data)?),
        _ => ComfyUIMessage::Other(envelope.kind),
    };
    Ok(message)
}
