//! Artifact transfer via presigned URLs
//!
//! The queue API hands out short-lived presigned URLs for the input image and
//! the output video; the worker never talks to blob storage with its own
//! credentials. Uploads stream straight from disk.

use crate::error::{Result, WorkerError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

/// Timeout for moving artifact bytes (distinct from the API call timeout).
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(300);

/// Presigned upload destination plus the final storage locator to report.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadRef {
    pub url: String,
    pub storage_path: String,
}

/// Moves task artifacts between local disk and remote storage.
#[async_trait]
pub trait ArtifactTransfer: Send + Sync {
    /// Short-lived URL granting read access to a stored input asset.
    async fn download_ref(&self, storage_path: &str) -> Result<String>;

    /// Presigned destination for this item's output artifact.
    async fn upload_ref(&self, item_id: &str, extension: &str) -> Result<UploadRef>;

    /// Stream a local file to a presigned destination.
    async fn push(&self, local_path: &Path, upload_url: &str, content_type: &str) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct PresignEnvelope {
    data: PresignData,
}

#[derive(Debug, Deserialize)]
struct PresignData {
    url: String,
    #[serde(default)]
    storage_path: Option<String>,
}

/// Presigned-URL transfer backed by the queue API's `/worker/presign`
/// endpoint.
pub struct PresignedTransfer {
    /// Authenticated client for the presign endpoint.
    api: Client,
    /// Plain client for presigned PUTs. Presigned URLs carry their own
    /// signature; an Authorization header would invalidate them.
    io: Client,
    base_url: String,
}

impl PresignedTransfer {
    pub fn new(base_url: &str, worker_token: &str, api_timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Worker {worker_token}"))
            .map_err(|_| WorkerError::Config("worker token contains invalid characters".into()))?;
        headers.insert(AUTHORIZATION, auth);

        let api = Client::builder()
            .default_headers(headers)
            .timeout(api_timeout)
            .build()
            .map_err(|e| WorkerError::Transport {
                endpoint: "transfer_client_init".to_string(),
                source: e,
            })?;
        let io = Client::builder()
            .timeout(TRANSFER_TIMEOUT)
            .build()
            .map_err(|e| WorkerError::Transport {
                endpoint: "transfer_client_init".to_string(),
                source: e,
            })?;

        Ok(Self {
            api,
            io,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn presign(&self, payload: serde_json::Value) -> Result<PresignData> {
        let endpoint = "/worker/presign";
        let url = format!("{}{}", self.base_url, endpoint);
        let response = self
            .api
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| WorkerError::Transport {
                endpoint: endpoint.to_string(),
                source: e,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(WorkerError::HttpStatus {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }

        let envelope: PresignEnvelope =
            response.json().await.map_err(|e| WorkerError::Transport {
                endpoint: endpoint.to_string(),
                source: e,
            })?;
        Ok(envelope.data)
    }
}

#[async_trait]
impl ArtifactTransfer for PresignedTransfer {
    async fn download_ref(&self, storage_path: &str) -> Result<String> {
        let data = self
            .presign(json!({
                "operation": "download",
                "storage_path": storage_path,
            }))
            .await?;
        Ok(data.url)
    }

    async fn upload_ref(&self, item_id: &str, extension: &str) -> Result<UploadRef> {
        let data = self
            .presign(json!({
                "operation": "upload",
                "video_item_id": item_id,
                "file_extension": extension,
            }))
            .await?;
        let storage_path = data.storage_path.ok_or_else(|| {
            WorkerError::Transfer("presign response missing storage_path".to_string())
        })?;
        Ok(UploadRef {
            url: data.url,
            storage_path,
        })
    }

    async fn push(&self, local_path: &Path, upload_url: &str, content_type: &str) -> Result<()> {
        let file = tokio::fs::File::open(local_path).await?;
        let size = file.metadata().await?.len();
        info!(
            "Uploading {} ({} bytes, {})",
            local_path.display(),
            size,
            content_type
        );

        let body = Body::wrap_stream(ReaderStream::new(file));
        let response = self
            .io
            .put(upload_url)
            .header(CONTENT_TYPE, content_type)
            .header(CONTENT_LENGTH, size)
            .body(body)
            .send()
            .await
            .map_err(|e| WorkerError::Transport {
                endpoint: "presigned_upload".to_string(),
                source: e,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(WorkerError::Transfer(format!(
                "upload rejected with HTTP {status}"
            )));
        }
        Ok(())
    }
}

/// MIME type for a file extension, for presigned upload headers.
pub fn content_type_for(extension: &str) -> &'static str {
    match extension.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Delete a temp artifact, ignoring errors. Missing files are fine; a file we
/// cannot delete will be overwritten by the next run with the same item id.
pub fn cleanup_artifact(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed temp artifact {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => debug!("Could not remove {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_types_cover_known_extensions() {
        assert_eq!(content_type_for("mp4"), "video/mp4");
        assert_eq!(content_type_for(".mp4"), "video/mp4");
        assert_eq!(content_type_for("JPEG"), "image/jpeg");
        assert_eq!(content_type_for("webp"), "image/webp");
        assert_eq!(content_type_for("bin"), "application/octet-stream");
    }

    #[test]
    fn cleanup_removes_file_and_tolerates_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("item-1_output.mp4");
        std::fs::write(&path, b"video").unwrap();

        cleanup_artifact(&path);
        assert!(!path.exists());

        // Second call is a no-op.
        cleanup_artifact(&path);
    }
}
