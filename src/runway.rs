//! Runway image-to-video client
//!
//! One `generate` call hides the whole provider round trip: create the
//! image-to-video job, poll it to completion under a deadline, then stream
//! the finished clip to local disk. From the processor's point of view this
//! is a single blocking operation.

use crate::error::{Result, WorkerError};
use crate::provider::Provider;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

const RUNWAY_BASE_URL: &str = "https://api.runwayml.com/v1";
const RUNWAY_API_VERSION: &str = "2024-11-06";

/// How often to check an in-flight Runway job.
const JOB_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Timeout for individual Runway API calls (the job itself is bounded
/// separately by the configured generation timeout).
const API_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything the provider needs for one clip.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Readable URL of the source image (typically presigned).
    pub input_image_url: String,
    pub prompt: String,
    /// Clip length in seconds, already clamped to provider bounds.
    pub duration: f64,
    /// Aspect ratio string, e.g. `1280:720`.
    pub ratio: String,
    pub provider: Provider,
}

/// Turns one input reference into one local output artifact.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Generate a clip and write it to `output_path`. Returns only once the
    /// artifact is on disk or the job has failed or timed out.
    async fn generate(&self, request: &GenerationRequest, output_path: &Path) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct CreatedJob {
    id: String,
}

#[derive(Debug, Deserialize)]
struct JobStatus {
    status: String,
    #[serde(default)]
    output: Vec<String>,
    #[serde(default)]
    failure: Option<String>,
}

/// Client for the Runway ML generation API.
pub struct RunwayClient {
    client: Client,
    base_url: String,
    /// Overall deadline for one generation job.
    timeout: Duration,
}

impl RunwayClient {
    pub fn new(api_key: &str, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| WorkerError::Config("Runway API key contains invalid characters".into()))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(
            "X-Runway-Version",
            HeaderValue::from_static(RUNWAY_API_VERSION),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(API_CALL_TIMEOUT)
            .build()
            .map_err(|e| WorkerError::Transport {
                endpoint: "runway_client_init".to_string(),
                source: e,
            })?;

        Ok(Self {
            client,
            base_url: RUNWAY_BASE_URL.to_string(),
            timeout,
        })
    }

    /// Create the image-to-video job and return its id.
    async fn create_job(&self, request: &GenerationRequest) -> Result<String> {
        let model = request.provider.model_name().ok_or_else(|| {
            WorkerError::Generation("provider is not served by this worker".to_string())
        })?;

        let url = format!("{}/image_to_video", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "model": model,
                "promptImage": request.input_image_url,
                "promptText": request.prompt,
                "duration": request.duration,
                "ratio": request.ratio,
            }))
            .send()
            .await
            .map_err(|e| WorkerError::Transport {
                endpoint: "image_to_video".to_string(),
                source: e,
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(WorkerError::Generation(format!(
                "job creation failed with HTTP {status}: {detail}"
            )));
        }

        let created: CreatedJob = response.json().await.map_err(|e| WorkerError::Transport {
            endpoint: "image_to_video".to_string(),
            source: e,
        })?;
        Ok(created.id)
    }

    /// Poll a job until it succeeds, fails, or the deadline passes.
    /// Transient poll errors are retried until the deadline.
    async fn wait_for_completion(&self, task_id: &str) -> Result<String> {
        let deadline = Instant::now() + self.timeout;

        loop {
            if Instant::now() >= deadline {
                return Err(WorkerError::GenerationTimeout {
                    task_id: task_id.to_string(),
                    timeout: self.timeout,
                });
            }

            match self.task_status(task_id).await {
                Ok(job) => match job.status.as_str() {
                    "SUCCEEDED" => {
                        return job.output.into_iter().next().ok_or_else(|| {
                            WorkerError::Generation(
                                "job succeeded but returned no output".to_string(),
                            )
                        });
                    }
                    "FAILED" => {
                        return Err(WorkerError::Generation(
                            job.failure
                                .unwrap_or_else(|| "unknown failure".to_string()),
                        ));
                    }
                    "PENDING" | "RUNNING" => {
                        debug!("Job {} still {}", task_id, job.status);
                    }
                    other => {
                        return Err(WorkerError::Generation(format!(
                            "unknown job status: {other}"
                        )));
                    }
                },
                Err(e) => {
                    warn!("Status poll for job {} failed: {}", task_id, e);
                }
            }

            sleep(JOB_POLL_INTERVAL).await;
        }
    }

    async fn task_status(&self, task_id: &str) -> Result<JobStatus> {
        let url = format!("{}/tasks/{}", self.base_url, task_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| WorkerError::Transport {
                endpoint: "tasks".to_string(),
                source: e,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(WorkerError::HttpStatus {
                endpoint: "tasks".to_string(),
                status: status.as_u16(),
            });
        }

        response.json().await.map_err(|e| WorkerError::Transport {
            endpoint: "tasks".to_string(),
            source: e,
        })
    }

    /// Stream the finished clip to disk.
    async fn download_artifact(&self, video_url: &str, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut response = self
            .client
            .get(video_url)
            .timeout(Duration::from_secs(300))
            .send()
            .await
            .map_err(|e| WorkerError::Transport {
                endpoint: "artifact_download".to_string(),
                source: e,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(WorkerError::Generation(format!(
                "artifact download failed with HTTP {status}"
            )));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        while let Some(chunk) = response.chunk().await.map_err(|e| WorkerError::Transport {
            endpoint: "artifact_download".to_string(),
            source: e,
        })? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl GenerationService for RunwayClient {
    async fn generate(&self, request: &GenerationRequest, output_path: &Path) -> Result<()> {
        let task_id = self.create_job(request).await?;
        info!("Runway job created: {}", task_id);

        let video_url = self.wait_for_completion(&task_id).await?;
        debug!("Job {} succeeded, downloading artifact", task_id);

        self.download_artifact(&video_url, output_path).await?;
        info!("Artifact written to {}", output_path.display());
        Ok(())
    }
}
