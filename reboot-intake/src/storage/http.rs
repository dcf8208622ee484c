//! Hosted storage REST client
//!
//! Speaks the object storage API of the hosted backend:
//! - Upload: `POST {base}/storage/v1/object/{bucket}/{name}`
//! - Public read: `GET {base}/storage/v1/object/public/{bucket}/{name}`

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

use super::{ObjectStore, UploadError};

/// Per-request timeout for uploads
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Object store backed by the hosted storage REST API
pub struct HttpObjectStore {
    http_client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpObjectStore {
    pub fn new(base_url: &str, api_key: Option<String>) -> reboot_common::Result<Self> {
        let http_client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| reboot_common::Error::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn object_url(&self, bucket: &str, name: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.base_url, bucket, name)
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(
        &self,
        bucket: &str,
        name: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), UploadError> {
        let url = self.object_url(bucket, name);
        debug!(url = %url, size = bytes.len(), "Uploading object");

        let mut request = self
            .http_client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header("x-upsert", "false")
            .body(bytes.to_vec());
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key).header("apikey", key);
        }

        let response = request.send().await.map_err(classify_transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }

    fn public_url(&self, bucket: &str, name: &str) -> String {
        format!("{}/storage/v1/object/public/{}/{}", self.base_url, bucket, name)
    }
}

/// Failures before any HTTP status was received
fn classify_transport_error(err: reqwest::Error) -> UploadError {
    if err.is_builder() {
        UploadError::InvalidName(err.to_string())
    } else {
        UploadError::Network(err.to_string())
    }
}

/// Map a non-success response onto the upload error taxonomy
///
/// The storage API sometimes reports a missing bucket as 400 with a
/// "not found" message, so the body is consulted for 400s.
pub fn classify_status(status: StatusCode, body: &str) -> UploadError {
    let detail = if body.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, body)
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => UploadError::Permission(detail),
        StatusCode::NOT_FOUND => UploadError::NotFound(detail),
        StatusCode::PAYLOAD_TOO_LARGE => UploadError::Oversize(detail),
        StatusCode::BAD_REQUEST if body.to_ascii_lowercase().contains("not found") => {
            UploadError::NotFound(detail)
        }
        StatusCode::BAD_REQUEST => UploadError::InvalidName(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => UploadError::Network(detail),
        s if s.is_server_error() => UploadError::Network(detail),
        _ => UploadError::Unknown(detail),
    }
}
