//! Task processor for handling individual generation tasks

use crate::error::Result;
use crate::provider::Provider;
use crate::queue::{LeaseClient, Task, TaskReport};
use crate::runway::{GenerationRequest, GenerationService};
use crate::transfer::{cleanup_artifact, content_type_for, ArtifactTransfer};
use crate::worker::{HeartbeatKeeper, WorkerConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Terminal outcome of one claimed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Artifact uploaded and `completed` reported.
    Succeeded,
    /// Pipeline error; `failed` reported best-effort.
    Failed,
    /// Belongs to a different worker class; nothing sent, lease left to
    /// expire.
    Skipped,
}

/// Runs the fixed pipeline for one claimed task and maps every exit path to
/// the right side effects: exactly one report for non-skipped tasks, heartbeat
/// stopped on every path, temp artifact cleaned up per the config flag.
pub struct TaskProcessor {
    config: WorkerConfig,
    queue: Arc<dyn LeaseClient>,
    transfer: Arc<dyn ArtifactTransfer>,
    generation: Arc<dyn GenerationService>,
    heartbeat: HeartbeatKeeper,
}

impl TaskProcessor {
    pub fn new(
        config: WorkerConfig,
        queue: Arc<dyn LeaseClient>,
        transfer: Arc<dyn ArtifactTransfer>,
        generation: Arc<dyn GenerationService>,
    ) -> Self {
        let heartbeat = HeartbeatKeeper::new(
            Arc::clone(&queue),
            config.heartbeat_interval,
            config.heartbeat_extend,
        );
        Self {
            config,
            queue,
            transfer,
            generation,
            heartbeat,
        }
    }

    /// Process a single task.
    ///
    /// Never returns an error: every pipeline failure is converted to a
    /// `Failed` outcome and a best-effort failure report.
    pub async fn process(&self, task: &Task) -> TaskOutcome {
        info!(
            "Task started: {} (group: {})",
            task.item_id,
            task.group()
        );

        // Step 1: resolve the provider hint through the closed enum.
        let hint = task
            .inference_provider
            .as_deref()
            .unwrap_or(&self.config.default_model);
        let provider = Provider::from_hint(hint);
        if provider == Provider::Foreign {
            // Another worker type owns this item; no heartbeat, no report.
            warn!(
                "Task {} is for another worker class ({}), skipping",
                task.item_id, hint
            );
            return TaskOutcome::Skipped;
        }

        // Step 2: requested duration, clamped to provider bounds.
        let duration = task.requested_duration(self.config.default_duration);

        let output_path = self.output_path(&task.item_id);

        // Step 3: keep the lease alive for the rest of the pipeline.
        let hb = self.heartbeat.start(&task.item_id);

        let outcome = match self
            .run_pipeline(task, provider, duration, &output_path)
            .await
        {
            Ok(storage_path) => {
                info!("Task complete: {} (SUCCESS -> {})", task.item_id, storage_path);
                TaskOutcome::Succeeded
            }
            Err(e) => {
                error!("Task {} failed: {}", task.item_id, e);
                let report = TaskReport::Failed {
                    error_message: format!("Runway: {e}"),
                };
                if let Err(report_err) = self.queue.report(&task.item_id, &report).await {
                    error!(
                        "Could not report failure for {}: {}",
                        task.item_id, report_err
                    );
                }
                info!("Task complete: {} (FAILED)", task.item_id);
                TaskOutcome::Failed
            }
        };

        // The flag applies to both paths so a failed artifact can be kept for
        // post-mortem inspection.
        if self.config.auto_cleanup {
            cleanup_artifact(&output_path);
        }

        hb.stop().await;
        outcome
    }

    /// Steps 4-7. Any error here short-circuits to the failure path.
    async fn run_pipeline(
        &self,
        task: &Task,
        provider: Provider,
        duration: f64,
        output_path: &Path,
    ) -> Result<String> {
        info!("[STEP 1/5] Getting image URL...");
        let image_url = self.transfer.download_ref(&task.photo_storage_path).await?;

        info!("[STEP 2/5] Generating video...");
        info!(
            "Model: {}, duration: {:.2}s, ratio: {}",
            provider, duration, self.config.default_ratio
        );
        let request = GenerationRequest {
            input_image_url: image_url,
            prompt: task.prompt.clone(),
            duration,
            ratio: self.config.default_ratio.clone(),
            provider,
        };
        self.generation.generate(&request, output_path).await?;

        info!("[STEP 3/5] Getting upload URL...");
        let upload = self.transfer.upload_ref(&task.item_id, "mp4").await?;

        info!("[STEP 4/5] Uploading result video...");
        self.transfer
            .push(output_path, &upload.url, content_type_for("mp4"))
            .await?;

        info!("[STEP 5/5] Reporting completion...");
        self.queue
            .report(
                &task.item_id,
                &TaskReport::Completed {
                    video_storage_path: upload.storage_path.clone(),
                },
            )
            .await?;

        Ok(upload.storage_path)
    }

    /// Temp artifact path, derived from the item id so a leftover file from a
    /// crashed run cannot collide with another item's artifact.
    fn output_path(&self, item_id: &str) -> PathBuf {
        self.config.temp_dir.join(format!("{item_id}_output.mp4"))
    }
}
