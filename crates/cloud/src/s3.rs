//! S3-compatible artifact store.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;

use crate::{content_type_for, object_key, ArtifactStore, StorageError};

/// Region used when `BUCKET_REGION` is not set.
const DEFAULT_REGION: &str = "us-east-1";

/// Lifetime of generated download URLs (7 days).
const PRESIGN_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Connection settings for an S3-compatible bucket.
#[derive(Clone)]
pub struct S3Config {
    pub endpoint_url: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    pub region: String,
    pub presign_expiry: Duration,
}

impl std::fmt::Debug for S3Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Config")
            .field("endpoint_url", &self.endpoint_url)
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl S3Config {
    /// Load bucket settings from environment variables.
    ///
    /// Returns `Ok(None)` when `BUCKET_ENDPOINT_URL` is unset, meaning
    /// artifacts are delivered inline.
    ///
    /// | Env Var                    | Default                      |
    /// |----------------------------|------------------------------|
    /// | `BUCKET_ENDPOINT_URL`      | unset (no external storage)  |
    /// | `BUCKET_ACCESS_KEY_ID`     | required with endpoint       |
    /// | `BUCKET_SECRET_ACCESS_KEY` | required with endpoint       |
    /// | `BUCKET_NAME`              | current month, `MM-YY`       |
    /// | `BUCKET_REGION`            | `us-east-1`                  |
    pub fn from_env() -> Result<Option<Self>, StorageError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Option<Self>, StorageError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let Some(endpoint_url) = lookup("BUCKET_ENDPOINT_URL") else {
            return Ok(None);
        };
        let access_key_id = lookup("BUCKET_ACCESS_KEY_ID").ok_or_else(|| {
            StorageError::Config("BUCKET_ACCESS_KEY_ID is required with BUCKET_ENDPOINT_URL".into())
        })?;
        let secret_access_key = lookup("BUCKET_SECRET_ACCESS_KEY").ok_or_else(|| {
            StorageError::Config(
                "BUCKET_SECRET_ACCESS_KEY is required with BUCKET_ENDPOINT_URL".into(),
            )
        })?;

        Ok(Some(Self {
            endpoint_url: endpoint_url.trim_end_matches('/').to_string(),
            access_key_id,
            secret_access_key,
            bucket: lookup("BUCKET_NAME").unwrap_or_else(default_bucket),
            region: lookup("BUCKET_REGION").unwrap_or_else(|| DEFAULT_REGION.to_string()),
            presign_expiry: PRESIGN_EXPIRY,
        }))
    }
}

/// Month-scoped bucket name (`MM-YY`) used when none is configured.
fn default_bucket() -> String {
    chrono::Utc::now().format("%m-%y").to_string()
}

/// [`ArtifactStore`] backed by an S3-compatible bucket.
pub struct S3ArtifactStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    presign_expiry: Duration,
}

impl S3ArtifactStore {
    /// Build an S3 client for `config`. Path-style addressing is forced
    /// so custom endpoints (R2, MinIO, ...) work without DNS buckets.
    pub async fn connect(config: &S3Config) -> Self {
        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            "ffgo-env",
        );

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .endpoint_url(config.endpoint_url.clone())
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();

        tracing::info!(
            endpoint = %config.endpoint_url,
            bucket = %config.bucket,
            "S3 artifact store configured",
        );

        Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
            presign_expiry: config.presign_expiry,
        }
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    async fn persist(
        &self,
        job_id: &str,
        path: &Path,
        filename: &str,
    ) -> Result<String, StorageError> {
        let key = object_key(job_id, filename);

        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::Io(format!("{}: {e}", path.display())))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(content_type_for(filename))
            .body(body)
            .send()
            .await
            .map_err(|e| StorageError::Upload(DisplayErrorContext(&e).to_string()))?;

        let presign = PresigningConfig::expires_in(self.presign_expiry)
            .map_err(|e| StorageError::Presign(e.to_string()))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .presigned(presign)
            .await
            .map_err(|e| StorageError::Presign(DisplayErrorContext(&e).to_string()))?;

        tracing::info!(bucket = %self.bucket, key = %key, "Artifact persisted");
        Ok(request.uri().to_string())
    }
}
