//! Typed view of the ComfyUI `/history/{prompt_id}` response.
//!
//! The endpoint returns `{"<prompt_id>": {"outputs": {...}, "status": {...}}}`
//! where `outputs` maps node address to the files that node produced.
//! Only the `images` and `videos` lists are read; anything else a node
//! reports is ignored.

use std::collections::BTreeMap;

use serde::Deserialize;

/// A file produced by a node, addressable through `/view`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArtifactRef {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// Storage area on the engine side (`output`, `temp`, `input`).
    #[serde(rename = "type", default = "default_artifact_type")]
    pub kind: String,
}

fn default_artifact_type() -> String {
    "output".to_string()
}

/// Which output list an artifact came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Image,
    Video,
}

/// Files reported by a single node.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeOutput {
    #[serde(default)]
    pub images: Vec<ArtifactRef>,
    #[serde(default)]
    pub videos: Vec<ArtifactRef>,
}

/// Execution status block of a history record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryStatus {
    #[serde(default)]
    pub status_str: Option<String>,
    #[serde(default)]
    pub completed: bool,
    /// `[event_name, payload]` pairs recorded during execution.
    #[serde(default)]
    pub messages: Vec<(String, serde_json::Value)>,
}

/// History of one finished prompt.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryRecord {
    #[serde(default)]
    pub outputs: BTreeMap<String, NodeOutput>,
    #[serde(default)]
    pub status: Option<HistoryStatus>,
}

impl HistoryRecord {
    /// All artifacts, node by node in key order, images before videos.
    pub fn artifacts(&self) -> Vec<(ArtifactKind, &ArtifactRef)> {
        self.outputs
            .values()
            .flat_map(|node| {
                node.images
                    .iter()
                    .map(|a| (ArtifactKind::Image, a))
                    .chain(node.videos.iter().map(|a| (ArtifactKind::Video, a)))
            })
            .collect()
    }

    /// Whether the engine recorded the run as failed.
    pub fn is_error(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.status_str.as_deref())
            .is_some_and(|s| s == "error")
    }

    /// The `exception_message` of a recorded `execution_error`, if any.
    pub fn error_message(&self) -> Option<String> {
        self.status.as_ref()?.messages.iter().find_map(|(name, payload)| {
            (name == "execution_error")
                .then(|| payload.get("exception_message")?.as_str().map(str::to_string))
                .flatten()
        })
    }
}

/// Errors decoding a history response.
#[derive(Debug, thiserror::Error)]
#[error("Malformed history record for prompt {prompt_id}: {source}")]
pub struct HistoryError {
    pub prompt_id: String,
    #[source]
    pub source: serde_json::Error,
}

/// Extract the record for `prompt_id` from a raw history response.
///
/// Returns `Ok(None)` when the engine has no record yet (the prompt is
/// still queued or running).
pub fn parse_history(
    prompt_id: &str,
    raw: &serde_json::Value,
) -> Result<Option<HistoryRecord>, HistoryError> {
    let Some(entry) = raw.get(prompt_id) else {
        return Ok(None);
    };
    HistoryRecord::deserialize(entry)
        .map(Some)
        .map_err(|source| HistoryError {
            prompt_id: prompt_id.to_string(),
            source,
        })
}
