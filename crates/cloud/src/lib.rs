//! External persistence for produced artifacts.
//!
//! The [`ArtifactStore`] trait is the worker's only view of object
//! storage: hand it a file, get back a durable handle (a URL) the
//! caller can download from. [`S3ArtifactStore`] implements it for any
//! S3-compatible endpoint.

use std::path::Path;

use async_trait::async_trait;

mod s3;

pub use s3::{S3ArtifactStore, S3Config};

/// Errors from artifact persistence.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Storage is configured incompletely or inconsistently.
    #[error("Storage configuration error: {0}")]
    Config(String),

    /// The local scratch file could not be read.
    #[error("Cannot read artifact file: {0}")]
    Io(String),

    /// The object store rejected the upload.
    #[error("Upload failed: {0}")]
    Upload(String),

    /// A download URL could not be produced for the stored object.
    #[error("Cannot create download URL: {0}")]
    Presign(String),
}

/// Persist large objects and return a durable handle for each.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store the file at `path` as `filename`, grouped under `job_id`,
    /// and return a URL the caller can fetch it from.
    async fn persist(&self, job_id: &str, path: &Path, filename: &str)
        -> Result<String, StorageError>;
}

/// Object key for an artifact: `<job_id>/<file name>`.
///
/// Only the final path component of `filename` is used so engine
/// subfolders never leak into the key.
pub fn object_key(job_id: &str, filename: &str) -> String {
    let name = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(filename);
    format!("{job_id}/{name}")
}

/// MIME type for an artifact, guessed from its extension.
pub fn content_type_for(filename: &str) -> &'static str {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        Some("gif") => "image/gif",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}
