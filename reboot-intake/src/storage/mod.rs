//! Remote uploader
//!
//! Pushes normalized sole photos to an object store and returns their public
//! URL. [`ObjectStore`] is the raw backend (hosted storage REST API or local
//! directory); [`RemoteUploader`] adds unique naming and retry with
//! exponential backoff on top of it.

pub mod http;
pub mod local;

pub use http::HttpObjectStore;
pub use local::LocalObjectStore;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backoff::{sleep_or_cancel, RetryPolicy};
use crate::photo::NormalizedImage;

/// Longest object name accepted by the store
const MAX_OBJECT_NAME_LEN: usize = 255;

/// Classified upload failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Bucket or object not found: {0}")]
    NotFound(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Payload too large: {0}")]
    Oversize(String),

    #[error("Invalid object name: {0}")]
    InvalidName(String),

    #[error("Upload failed: {0}")]
    Unknown(String),

    #[error("Upload cancelled")]
    Cancelled,
}

impl UploadError {
    /// Whether another attempt could succeed without changing the request
    pub fn is_retryable(&self) -> bool {
        matches!(self, UploadError::Network(_) | UploadError::Unknown(_))
    }
}

/// Raw object storage backend
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` as `bucket/name`; a single attempt
    async fn put(
        &self,
        bucket: &str,
        name: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), UploadError>;

    /// Publicly readable URL of `bucket/name`
    fn public_url(&self, bucket: &str, name: &str) -> String;
}

/// Uploads a normalized photo and resolves its public URL
#[async_trait]
pub trait PhotoUploader: Send + Sync {
    /// Pending retries are abandoned once `cancel` fires
    async fn upload(
        &self,
        image: &NormalizedImage,
        cancel: &CancellationToken,
    ) -> Result<String, UploadError>;
}

/// Reject names the storage API would refuse
pub fn validate_object_name(name: &str) -> Result<(), UploadError> {
    if name.is_empty() || name.len() > MAX_OBJECT_NAME_LEN {
        return Err(UploadError::InvalidName(format!(
            "name must be 1-{} bytes",
            MAX_OBJECT_NAME_LEN
        )));
    }
    if name.starts_with('/') || name.split('/').any(|seg| seg.is_empty() || seg == "..") {
        return Err(UploadError::InvalidName(format!("bad path segment in {:?}", name)));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
    {
        return Err(UploadError::InvalidName(format!("unsupported characters in {:?}", name)));
    }
    Ok(())
}

/// Unique object name for a sole photo of the given content type
pub fn generate_object_name(content_type: &str) -> String {
    let extension = match content_type {
        "image/png" => "png",
        "image/webp" => "webp",
        _ => "jpg",
    };
    format!("sole-{}.{}", Uuid::new_v4(), extension)
}

/// [`PhotoUploader`] over any [`ObjectStore`], retrying transient failures
pub struct RemoteUploader {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    policy: RetryPolicy,
}

impl RemoteUploader {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            policy,
        }
    }

    /// Upload under an explicit name, retrying per policy until `cancel` fires
    pub async fn upload_named(
        &self,
        name: &str,
        bytes: &[u8],
        content_type: &str,
        cancel: &CancellationToken,
    ) -> Result<String, UploadError> {
        validate_object_name(name)?;

        let attempts = self.policy.total_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                debug!(object = %name, attempt, "Upload cancelled before attempt");
                return Err(UploadError::Cancelled);
            }

            match self.store.put(&self.bucket, name, bytes, content_type).await {
                Ok(()) => {
                    let url = self.store.public_url(&self.bucket, name);
                    info!(
                        bucket = %self.bucket,
                        object = %name,
                        attempt,
                        size = bytes.len(),
                        "Photo uploaded"
                    );
                    return Ok(url);
                }
                Err(err) if !err.is_retryable() => {
                    warn!(bucket = %self.bucket, object = %name, error = %err, "Upload rejected, not retrying");
                    return Err(err);
                }
                Err(err) if attempt >= attempts => {
                    warn!(
                        bucket = %self.bucket,
                        object = %name,
                        attempt,
                        error = %err,
                        "Upload failed, attempts exhausted"
                    );
                    return Err(err);
                }
                Err(err) => {
                    let delay = self.policy.delay_for(attempt - 1);
                    warn!(
                        bucket = %self.bucket,
                        object = %name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Upload failed, will retry after backoff"
                    );
                    if !sleep_or_cancel(delay, cancel).await {
                        debug!(object = %name, attempt, "Upload cancelled during backoff");
                        return Err(UploadError::Cancelled);
                    }
                    debug!(object = %name, attempt = attempt + 1, "Retrying upload");
                }
            }
        }
    }
}

#[async_trait]
impl PhotoUploader for RemoteUploader {
    async fn upload(
        &self,
        image: &NormalizedImage,
        cancel: &CancellationToken,
    ) -> Result<String, UploadError> {
        let name = generate_object_name(image.content_type);
        self.upload_named(&name, &image.bytes, image.content_type, cancel)
            .await
    }
}
