//! Job boundary types: what the hosting platform hands the worker and
//! what the worker hands back.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

/// One job invocation as delivered by the hosting platform.
#[derive(Debug, Clone, Deserialize)]
pub struct JobRequest {
    pub id: String,
    pub input: JobInput,
}

/// Caller-supplied generation parameters.
///
/// Either `workflow` is given and forwarded verbatim, or the bundled
/// template is patched with `prompt`, `negative_prompt`, `seed` and the
/// uploaded image names.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobInput {
    pub prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub seed: Option<u64>,
    #[serde(default)]
    pub images: Vec<UploadSpec>,
    pub workflow: Option<Value>,
}

/// An input image to push into the engine's input store.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadSpec {
    /// Target filename in the engine input store.
    pub name: String,
    /// Base64 payload, optionally prefixed with a data URI header.
    pub image: String,
}

impl JobInput {
    /// Check the input before any network call is made.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.images.is_empty() {
            return Err(CoreError::Validation(
                "Missing or invalid 'images' parameter. At least 1 image required.".into(),
            ));
        }

        let mut seen = HashSet::new();
        for spec in &self.images {
            if spec.name.trim().is_empty() {
                return Err(CoreError::Validation("Image name must not be empty".into()));
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(CoreError::Validation(format!(
                    "Duplicate image name '{}'",
                    spec.name
                )));
            }
        }

        match &self.workflow {
            Some(workflow) if !workflow.is_object() => Err(CoreError::Validation(
                "'workflow' must be a JSON object".into(),
            )),
            Some(_) => Ok(()),
            None if self.prompt.as_deref().map_or(true, |p| p.trim().is_empty()) => Err(
                CoreError::Validation("Missing 'prompt' parameter".into()),
            ),
            None => Ok(()),
        }
    }

    /// Names of the input images, in caller order.
    pub fn image_names(&self) -> Vec<String> {
        self.images.iter().map(|spec| spec.name.clone()).collect()
    }
}

/// How a produced artifact is transported back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultKind {
    /// Bytes are embedded in `data` as base64.
    #[serde(rename = "base64")]
    Base64,
    /// Bytes were persisted externally; `data` is a download URL.
    #[serde(rename = "s3_url")]
    S3Url,
}

/// One produced artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultItem {
    #[serde(rename = "type")]
    pub kind: ResultKind,
    pub data: String,
    pub filename: String,
}

/// Terminal result of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobOutput {
    Success {
        output: Vec<ResultItem>,
    },
    Failure {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },
}

impl JobOutput {
    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
            details: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}
