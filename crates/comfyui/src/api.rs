//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps liveness, node introspection, image upload, workflow
//! submission, queue control, history retrieval and artifact download
//! using [`reqwest`].

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::history::ArtifactRef;

/// Timeout for the lightweight liveness check.
const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for ordinary JSON and upload requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for artifact downloads (videos can be large).
const VIEW_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP side of one ComfyUI instance.
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

/// Acknowledgement from `POST /prompt`.
#[derive(Debug, Clone)]
pub struct SubmitResponse {
    /// Correlation id for events and history of this run.
    pub prompt_id: String,
    /// Position in the execution queue, when reported.
    pub number: Option<i64>,
}

/// Response returned by `/upload/image`.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    /// Name the engine stored the file under.
    pub name: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// A success response lacked a field the protocol requires.
    #[error("ComfyUI response is missing '{0}'")]
    MissingField(&'static str),
}

impl ComfyUIApi {
    /// Create a new API client for a ComfyUI instance.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://127.0.0.1:8188`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self { client, api_url }
    }

    /// HTTP API base URL.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Single liveness check against `GET /`.
    pub async fn ping(&self) -> Result<(), ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/", self.api_url))
            .timeout(PING_TIMEOUT)
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Fetch the registered node types (`GET /object_info`).
    ///
    /// The result maps node class name to its input/output schema.
    pub async fn object_info(&self) -> Result<Value, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/object_info", self.api_url))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Store an input image under `name`, overwriting any existing file.
    pub async fn upload_image(
        &self,
        name: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadResponse, ComfyUIApiError> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(name.to_string())
            .mime_str("image/png")?;
        let form = reqwest::multipart::Form::new()
            .part("image", part)
            .text("overwrite", "true");

        let response = self
            .client
            .post(format!("{}/upload/image", self.api_url))
            .multipart(form)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Queue `workflow` under session `client_id` (`POST /prompt`).
    ///
    /// The decoded body must carry a `prompt_id`; a 2xx without one is
    /// [`ComfyUIApiError::MissingField`].
    pub async fn submit_workflow(
        &self,
        workflow: &Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": client_id,
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .json(&body)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let body: Value = Self::parse_response(response).await?;
        let prompt_id = body
            .get("prompt_id")
            .and_then(Value::as_str)
            .ok_or(ComfyUIApiError::MissingField("prompt_id"))?
            .to_string();

        Ok(SubmitResponse {
            prompt_id,
            number: body.get("number").and_then(Value::as_i64),
        })
    }

    /// Remove a queued prompt (`POST /queue` with `delete`).
    pub async fn cancel_execution(&self, prompt_id: &str) -> Result<(), ComfyUIApiError> {
        let body = serde_json::json!({
            "delete": [prompt_id],
        });

        let response = self
            .client
            .post(format!("{}/queue", self.api_url))
            .json(&body)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Interrupt whatever is executing right now (`POST /interrupt`).
    pub async fn interrupt(&self) -> Result<(), ComfyUIApiError> {
        let response = self
            .client
            .post(format!("{}/interrupt", self.api_url))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Raw history for one prompt.
    ///
    /// Sends a `GET /history/{prompt_id}` request. Decode the result
    /// with [`crate::history::parse_history`].
    pub async fn get_history(&self, prompt_id: &str) -> Result<Value, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, prompt_id))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Download the raw bytes of a produced artifact (`GET /view`).
    pub async fn view(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/view", self.api_url))
            .query(&[
                ("filename", artifact.filename.as_str()),
                ("subfolder", artifact.subfolder.as_str()),
                ("type", artifact.kind.as_str()),
            ])
            .timeout(VIEW_TIMEOUT)
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    // ---- private helpers ----

    /// Pass 2xx responses through; anything else becomes
    /// [`ComfyUIApiError::ApiError`] with the body text attached.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Decode a 2xx JSON body.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Require 2xx and drop the body.
    async fn check_status(response: reqwest::Response) -> Result<(), ComfyUIApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}
