//! Task runner - main worker loop

use crate::error::Result;
use crate::queue::LeaseClient;
use crate::worker::{PollScheduler, TaskOutcome, TaskProcessor, WorkerConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

/// Pause after a processed task before the next poll, to avoid a tight loop
/// when items are immediately available.
const POST_TASK_PAUSE: Duration = Duration::from_secs(1);

/// Task runner that polls the queue and processes claimed tasks.
pub struct TaskRunner {
    config: WorkerConfig,
    queue: Arc<dyn LeaseClient>,
    processor: TaskProcessor,
    scheduler: PollScheduler,
    shutdown: Arc<AtomicBool>,
}

impl TaskRunner {
    /// Create a new task runner
    pub fn new(config: WorkerConfig, queue: Arc<dyn LeaseClient>, processor: TaskProcessor) -> Self {
        let scheduler = PollScheduler::new(
            config.poll_interval_slow,
            config.poll_interval_fast,
            config.fast_poll_window,
        );
        Self {
            config,
            queue,
            processor,
            scheduler,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get a handle to signal shutdown
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Main worker loop
    ///
    /// Polls for tasks until shutdown is signaled. The shutdown flag is
    /// checked at iteration boundaries only, so a task in flight always runs
    /// to completion (or to its own timeout) before the loop exits.
    pub async fn run(&mut self) -> Result<()> {
        info!("Starting i2v worker: {}", self.config.worker_id);
        info!("Queue API: {}", self.config.queue_api_url);
        info!(
            "Polling: {:?} (slow) / {:?} (fast for {:?} after a task)",
            self.config.poll_interval_slow,
            self.config.poll_interval_fast,
            self.config.fast_poll_window
        );
        info!("Lease: {:?}, heartbeat every {:?}",
            self.config.lease_duration, self.config.heartbeat_interval
        );

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                info!("Shutdown signal received, stopping worker...");
                break;
            }

            match self.process_one_task().await {
                Ok(true) => {
                    // Brief pause before the next poll.
                    sleep(POST_TASK_PAUSE).await;
                }
                Ok(false) => {
                    let interval = self.scheduler.next_interval();
                    info!("[IDLE] No task available, sleeping {:?}", interval);
                    sleep(interval).await;
                }
                Err(e) => {
                    // Transient queue errors are an idle iteration; the
                    // scheduler's interval is the whole retry policy.
                    error!("Poll failed: {}", e);
                    let interval = self.scheduler.next_interval();
                    info!("Retrying in {:?}", interval);
                    sleep(interval).await;
                }
            }
        }

        info!("Worker shutdown complete");
        Ok(())
    }

    /// Poll once and process the claimed task, if any.
    ///
    /// Returns:
    /// - Ok(true) if a task was processed (in any outcome, including skip)
    /// - Ok(false) if no tasks were available
    /// - Err on a failed poll
    pub async fn process_one_task(&mut self) -> Result<bool> {
        let task = match self
            .queue
            .acquire(self.config.lease_duration.as_secs())
            .await?
        {
            Some(t) => t,
            None => return Ok(false),
        };

        info!("[TASK RECEIVED] item_id: {}", task.item_id);
        let outcome = self.processor.process(&task).await;

        // Every processed task counts as activity for poll acceleration,
        // whatever its outcome.
        self.scheduler.record_activity();

        match outcome {
            TaskOutcome::Succeeded | TaskOutcome::Failed => {
                info!(
                    "Switching to fast polling ({:?}) for {:?}",
                    self.config.poll_interval_fast, self.config.fast_poll_window
                );
            }
            TaskOutcome::Skipped => {
                info!("Task {} left for its own worker class", task.item_id);
            }
        }

        Ok(true)
    }

    /// Run once and exit (for testing and the `--once` flag)
    pub async fn run_once(&mut self) -> Result<bool> {
        info!("Running worker in single-task mode...");
        self.process_one_task().await
    }
}

/// Setup signal handlers for graceful shutdown
pub fn setup_signal_handler(shutdown: Arc<AtomicBool>) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, finishing current task before exit...");
                shutdown.store(true, Ordering::Relaxed);
            }
            Err(e) => {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
        }
    });
}
