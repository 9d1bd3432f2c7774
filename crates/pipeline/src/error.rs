use std::time::Duration;

use serde_json::Value;

use ffgo_comfyui::monitor::MonitorError;
use ffgo_comfyui::reconnect::ReconnectError;
use ffgo_core::error::CoreError;

/// Every way a job can fail, one variant per pipeline stage outcome.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{0}")]
    InvalidInput(String),

    /// The deployment's workflow template does not fit the patch points.
    #[error("Workflow template error: {0}")]
    TemplateInvalid(String),

    #[error("ComfyUI server ({0}) not reachable after multiple retries.")]
    ServerUnreachable(String),

    #[error("Required node '{node}' not available after {timeout_secs}s")]
    NodeNotReady { node: String, timeout_secs: u64 },

    /// One message per failed image, in upload order.
    #[error("Failed to upload one or more input images")]
    UploadFailed { errors: Vec<String> },

    #[error("Workflow validation failed: {0}")]
    SubmissionRejected(String),

    #[error("Unexpected response from ComfyUI: {0}")]
    ProtocolMismatch(String),

    #[error("Failed to open websocket: {0}")]
    SocketUnavailable(String),

    #[error("Workflow execution error: {0}")]
    ExecutionFailed(String),

    #[error("Websocket connection lost: {0}")]
    ConnectionLost(String),

    #[error("Job timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Job cancelled")]
    Cancelled,

    #[error("Failed to fetch outputs: {0}")]
    ArtifactFetchFailed(String),

    #[error("Failed to persist output: {0}")]
    PersistenceFailed(String),
}

impl PipelineError {
    /// Extra structured context for the job output, when the variant
    /// carries any.
    pub fn details(&self) -> Option<Value> {
        match self {
            Self::UploadFailed { errors } => Some(Value::from(errors.clone())),
            _ => None,
        }
    }
}

impl From<CoreError> for PipelineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) => Self::InvalidInput(msg),
            CoreError::Internal(msg) => Self::TemplateInvalid(msg),
        }
    }
}

impl From<MonitorError> for PipelineError {
    fn from(err: MonitorError) -> Self {
        match err {
            MonitorError::ExecutionFailed(msg) => Self::ExecutionFailed(msg),
            MonitorError::Reconnect(ReconnectError::Cancelled) | MonitorError::Cancelled => {
                Self::Cancelled
            }
            MonitorError::Reconnect(e) => Self::ConnectionLost(e.to_string()),
        }
    }
}
