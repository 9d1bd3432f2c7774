//! Pushes caller-supplied input images into the engine's input store.

use ffgo_comfyui::api::ComfyUIApi;
use ffgo_core::encoding::decode_image_payload;
use ffgo_core::job::UploadSpec;

use crate::error::PipelineError;

pub struct AssetUploader<'a> {
    api: &'a ComfyUIApi,
}

impl<'a> AssetUploader<'a> {
    pub fn new(api: &'a ComfyUIApi) -> Self {
        Self { api }
    }

    /// Upload every image, returning how many were stored.
    ///
    /// A failing image does not stop the others; all failures are
    /// reported together in [`PipelineError::UploadFailed`]. Images that
    /// did upload stay on the engine.
    pub async fn upload(&self, specs: &[UploadSpec]) -> Result<usize, PipelineError> {
        if specs.is_empty() {
            return Ok(0);
        }

        tracing::info!(count = specs.len(), "Uploading input images");

        let mut errors = Vec::new();
        let mut uploaded = 0usize;

        for spec in specs {
            let bytes = match decode_image_payload(&spec.image) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(name = %spec.name, error = %e, "Image payload is not valid base64");
                    errors.push(format!("Error uploading {}: {e}", spec.name));
                    continue;
                }
            };

            match self.api.upload_image(&spec.name, bytes).await {
                Ok(stored) => {
                    tracing::debug!(name = %spec.name, stored_as = %stored.name, "Uploaded image");
                    uploaded += 1;
                }
                Err(e) => {
                    tracing::warn!(name = %spec.name, error = %e, "Image upload failed");
                    errors.push(format!("Error uploading {}: {e}", spec.name));
                }
            }
        }

        if !errors.is_empty() {
            return Err(PipelineError::UploadFailed { errors });
        }

        tracing::info!(count = uploaded, "Uploaded input images");
        Ok(uploaded)
    }
}
