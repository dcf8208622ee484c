//! Filesystem object store
//!
//! Objects live under `<root>/<bucket>/<name>` and are served by the intake
//! service's `/storage` route, so a single process can run without a hosted
//! backend.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;

use super::{validate_object_name, ObjectStore, UploadError};

pub struct LocalObjectStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalObjectStore {
    /// `public_base_url` is the URL prefix `root` is served under
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }
}

fn classify_io_error(err: std::io::Error) -> UploadError {
    match err.kind() {
        ErrorKind::PermissionDenied => UploadError::Permission(err.to_string()),
        ErrorKind::NotFound => UploadError::NotFound(err.to_string()),
        _ => UploadError::Unknown(err.to_string()),
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(
        &self,
        bucket: &str,
        name: &str,
        bytes: &[u8],
        _content_type: &str,
    ) -> Result<(), UploadError> {
        validate_object_name(bucket)?;
        validate_object_name(name)?;

        let path = self.root.join(bucket).join(name);
        if path.exists() {
            return Err(UploadError::InvalidName(format!("object already exists: {}/{}", bucket, name)));
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(classify_io_error)?;
        }

        // Readers never observe a partial file
        let tmp = path.with_extension("partial");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(classify_io_error)?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(classify_io_error)?;

        Ok(())
    }

    fn public_url(&self, bucket: &str, name: &str) -> String {
        format!("{}/{}/{}", self.public_base_url, bucket, name)
    }
}
