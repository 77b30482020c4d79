//! Queue API client
//!
//! Talks to the backend worker endpoints: claim the next leased task, extend
//! a lease while processing, and report the terminal result. The `LeaseClient`
//! trait is the seam the worker loop is written against; `QueueClient` is the
//! HTTP implementation.

use crate::error::{Result, WorkerError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

/// Assumed source frame rate when converting `frame_num` to seconds.
pub const FRAME_RATE: f64 = 24.0;

/// Provider-accepted clip duration bounds in seconds.
pub const MIN_DURATION_SECS: f64 = 2.0;
pub const MAX_DURATION_SECS: f64 = 10.0;

/// One unit of work claimed from the queue.
///
/// Field names follow the worker API wire format.
#[derive(Debug, Clone, Deserialize)]
pub struct Task {
    pub item_id: String,
    #[serde(default)]
    pub group_id: Option<String>,
    /// Storage locator of the source image.
    pub photo_storage_path: String,
    #[serde(default)]
    pub prompt: String,
    /// Requested clip length in frames, if the item specifies one.
    #[serde(default)]
    pub frame_num: Option<u32>,
    /// Backend hint; items without one fall back to the configured default
    /// model.
    #[serde(default)]
    pub inference_provider: Option<String>,
}

impl Task {
    /// Clip duration in seconds: `frame_num / 24`, clamped to the provider's
    /// accepted range. Items without a frame count use the configured default.
    pub fn requested_duration(&self, default_duration: f64) -> f64 {
        match self.frame_num {
            Some(frames) => {
                (f64::from(frames) / FRAME_RATE).clamp(MIN_DURATION_SECS, MAX_DURATION_SECS)
            }
            None => default_duration,
        }
    }

    /// Correlation id for log lines.
    pub fn group(&self) -> &str {
        self.group_id.as_deref().unwrap_or("unknown")
    }
}

/// Terminal result for a claimed task. Exactly one report is sent per
/// non-skipped item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskReport {
    Completed { video_storage_path: String },
    Failed { error_message: String },
}

/// Lease operations the worker loop and heartbeat depend on.
#[async_trait]
pub trait LeaseClient: Send + Sync {
    /// Claim the next available task, establishing a server-side lease of
    /// `lease_seconds`. `None` when the queue is empty.
    async fn acquire(&self, lease_seconds: u64) -> Result<Option<Task>>;

    /// Extend the lease on an in-flight item. Failures are non-fatal; the
    /// caller keeps processing either way.
    async fn extend(&self, item_id: &str, extend_seconds: u64) -> Result<bool>;

    /// Report the terminal outcome for an item.
    async fn report(&self, item_id: &str, report: &TaskReport) -> Result<bool>;
}

/// Standard `{success, data, error}` envelope returned by the worker API.
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    #[serde(default)]
    success: bool,
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP client for the queue's worker endpoints.
pub struct QueueClient {
    client: Client,
    base_url: String,
    worker_id: String,
    worker_type: String,
}

impl QueueClient {
    /// Create a client authenticated with the worker token.
    pub fn new(
        base_url: &str,
        worker_token: &str,
        worker_id: &str,
        worker_type: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Worker {worker_token}"))
            .map_err(|_| WorkerError::Config("worker token contains invalid characters".into()))?;
        headers.insert(AUTHORIZATION, auth);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| WorkerError::Transport {
                endpoint: "client_init".to_string(),
                source: e,
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            worker_id: worker_id.to_string(),
            worker_type: worker_type.to_string(),
        })
    }

    /// POST a JSON payload to a worker endpoint and decode the envelope.
    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        payload: serde_json::Value,
    ) -> Result<ApiEnvelope<T>> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| WorkerError::Transport {
                endpoint: path.to_string(),
                source: e,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(WorkerError::HttpStatus {
                endpoint: path.to_string(),
                status: status.as_u16(),
            });
        }

        response.json().await.map_err(|e| WorkerError::Transport {
            endpoint: path.to_string(),
            source: e,
        })
    }
}

#[async_trait]
impl LeaseClient for QueueClient {
    async fn acquire(&self, lease_seconds: u64) -> Result<Option<Task>> {
        let envelope: ApiEnvelope<Task> = self
            .post(
                "/worker/next-task",
                json!({
                    "worker_id": self.worker_id,
                    "worker_type": self.worker_type,
                    "lease_duration_seconds": lease_seconds,
                }),
            )
            .await?;

        if !envelope.success {
            if let Some(message) = envelope.error {
                return Err(WorkerError::QueueApi(message));
            }
            return Ok(None);
        }

        Ok(envelope.data)
    }

    async fn extend(&self, item_id: &str, extend_seconds: u64) -> Result<bool> {
        let result: Result<ApiEnvelope<serde_json::Value>> = self
            .post(
                "/worker/heartbeat",
                json!({
                    "item_id": item_id,
                    "worker_id": self.worker_id,
                    "extend_seconds": extend_seconds,
                }),
            )
            .await;

        // Heartbeats are best-effort: the lease expires naturally if the
        // queue stays unreachable, so transport errors become `false`.
        match result {
            Ok(envelope) => Ok(envelope.success),
            Err(e) => {
                debug!("Heartbeat request failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn report(&self, item_id: &str, report: &TaskReport) -> Result<bool> {
        let mut payload = json!({
            "item_id": item_id,
            "worker_id": self.worker_id,
        });
        match report {
            TaskReport::Completed { video_storage_path } => {
                payload["status"] = json!("completed");
                payload["video_storage_path"] = json!(video_storage_path);
            }
            TaskReport::Failed { error_message } => {
                payload["status"] = json!("failed");
                payload["error_message"] = json!(error_message);
            }
        }

        let envelope: ApiEnvelope<serde_json::Value> =
            self.post("/worker/report", payload).await?;
        if !envelope.success {
            warn!(
                "Report for {} rejected: {}",
                item_id,
                envelope.error.as_deref().unwrap_or("no error detail")
            );
        }
        Ok(envelope.success)
    }
}
