//! Turns a finished prompt's history into caller-facing result items.

use std::path::Path;
use std::sync::Arc;

use ffgo_cloud::ArtifactStore;
use ffgo_comfyui::api::ComfyUIApi;
use ffgo_comfyui::history::{parse_history, ArtifactKind, ArtifactRef};
use ffgo_core::encoding::encode_artifact;
use ffgo_core::job::{ResultItem, ResultKind};

use crate::error::PipelineError;

/// How artifact bytes travel back to the caller.
///
/// Chosen once per job and applied to images and videos alike.
#[derive(Clone)]
pub enum ArtifactDelivery {
    /// Embed the bytes as base64.
    Inline,
    /// Persist through the store and return its handle.
    External(Arc<dyn ArtifactStore>),
}

impl std::fmt::Debug for ArtifactDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inline => f.write_str("Inline"),
            Self::External(_) => f.write_str("External"),
        }
    }
}

pub struct ResultCollector<'a> {
    api: &'a ComfyUIApi,
    delivery: &'a ArtifactDelivery,
}

impl<'a> ResultCollector<'a> {
    pub fn new(api: &'a ComfyUIApi, delivery: &'a ArtifactDelivery) -> Self {
        Self { api, delivery }
    }

    /// Download every artifact recorded for `prompt_id`.
    ///
    /// Items come out node by node in key order, images before videos
    /// within a node. The first failing download aborts collection.
    pub async fn collect(
        &self,
        prompt_id: &str,
        job_id: &str,
    ) -> Result<Vec<ResultItem>, PipelineError> {
        let raw = self.api.get_history(prompt_id).await.map_err(|e| {
            PipelineError::ArtifactFetchFailed(format!("history for {prompt_id}: {e}"))
        })?;
        let record = parse_history(prompt_id, &raw)
            .map_err(|e| PipelineError::ProtocolMismatch(e.to_string()))?
            .ok_or_else(|| {
                PipelineError::ProtocolMismatch(format!("Prompt {prompt_id} not found in history"))
            })?;

        let artifacts = record.artifacts();
        tracing::info!(prompt_id = %prompt_id, count = artifacts.len(), "Collecting outputs");

        let mut items = Vec::with_capacity(artifacts.len());
        for (kind, artifact) in artifacts {
            let bytes = self.api.view(artifact).await.map_err(|e| {
                PipelineError::ArtifactFetchFailed(format!("{}: {e}", artifact.filename))
            })?;
            tracing::debug!(
                filename = %artifact.filename,
                kind = kind_label(kind),
                size = bytes.len(),
                "Downloaded artifact",
            );
            items.push(self.deliver(job_id, artifact, &bytes).await?);
        }

        if items.is_empty() {
            tracing::warn!(prompt_id = %prompt_id, "Workflow produced no images or videos");
        }
        Ok(items)
    }

    async fn deliver(
        &self,
        job_id: &str,
        artifact: &ArtifactRef,
        bytes: &[u8],
    ) -> Result<ResultItem, PipelineError> {
        match self.delivery {
            ArtifactDelivery::Inline => Ok(ResultItem {
                kind: ResultKind::Base64,
                data: encode_artifact(bytes),
                filename: artifact.filename.clone(),
            }),
            ArtifactDelivery::External(store) => {
                let handle = persist_via_scratch(store.as_ref(), job_id, artifact, bytes).await?;
                Ok(ResultItem {
                    kind: ResultKind::S3Url,
                    data: handle,
                    filename: artifact.filename.clone(),
                })
            }
        }
    }
}

/// Write `bytes` to a scratch file and hand it to the store. The file
/// is removed when this returns, on every path.
async fn persist_via_scratch(
    store: &dyn ArtifactStore,
    job_id: &str,
    artifact: &ArtifactRef,
    bytes: &[u8],
) -> Result<String, PipelineError> {
    let suffix = Path::new(&artifact.filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();

    let scratch = tempfile::Builder::new()
        .prefix("ffgo-")
        .suffix(&suffix)
        .tempfile()
        .map_err(|e| PipelineError::PersistenceFailed(format!("scratch file: {e}")))?;
    tokio::fs::write(scratch.path(), bytes)
        .await
        .map_err(|e| PipelineError::PersistenceFailed(format!("scratch file: {e}")))?;

    let handle = store
        .persist(job_id, scratch.path(), &artifact.filename)
        .await
        .map_err(|e| PipelineError::PersistenceFailed(e.to_string()))?;

    tracing::info!(job_id = %job_id, filename = %artifact.filename, "Artifact persisted externally");
    Ok(handle)
}

fn kind_label(kind: ArtifactKind) -> &'static str {
    match kind {
        ArtifactKind::Image => "image",
        ArtifactKind::Video => "video",
    }
}
