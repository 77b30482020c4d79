//! Worker loop and pipeline tests with mocked collaborators
//!
//! The queue, transfer, and generation services are replaced with in-memory
//! mocks; tokio's paused clock makes the heartbeat and polling timelines
//! deterministic.

use async_trait::async_trait;
use i2v_worker::error::{Result, WorkerError};
use i2v_worker::queue::{LeaseClient, Task, TaskReport};
use i2v_worker::runway::{GenerationRequest, GenerationService};
use i2v_worker::transfer::{ArtifactTransfer, UploadRef};
use i2v_worker::worker::{TaskOutcome, TaskProcessor, TaskRunner, WorkerConfig};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

fn make_task(item_id: &str, frame_num: Option<u32>, provider: &str) -> Task {
    Task {
        item_id: item_id.to_string(),
        group_id: Some("group-1".to_string()),
        photo_storage_path: format!("photos/{item_id}.jpg"),
        prompt: "a quiet street at dawn".to_string(),
        frame_num,
        inference_provider: Some(provider.to_string()),
    }
}

fn test_config(temp_dir: &Path) -> WorkerConfig {
    WorkerConfig::builder()
        .worker_id("test-worker")
        .temp_dir(temp_dir)
        .heartbeat_interval(Duration::from_secs(120))
        .poll_intervals(Duration::from_secs(60), Duration::from_secs(5))
        .fast_poll_window(Duration::from_secs(1800))
        .build()
}

#[derive(Default)]
struct MockQueue {
    tasks: Mutex<VecDeque<Task>>,
    acquires: AtomicUsize,
    extends: AtomicUsize,
    reports: Mutex<Vec<(String, TaskReport)>>,
    fail_reports: bool,
}

impl MockQueue {
    fn with_tasks(tasks: Vec<Task>) -> Self {
        Self {
            tasks: Mutex::new(tasks.into()),
            ..Self::default()
        }
    }

    fn acquire_count(&self) -> usize {
        self.acquires.load(Ordering::SeqCst)
    }

    fn extend_count(&self) -> usize {
        self.extends.load(Ordering::SeqCst)
    }

    fn reports(&self) -> Vec<(String, TaskReport)> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl LeaseClient for MockQueue {
    async fn acquire(&self, _lease_seconds: u64) -> Result<Option<Task>> {
        self.acquires.fetch_add(1, Ordering::SeqCst);
        Ok(self.tasks.lock().unwrap().pop_front())
    }

    async fn extend(&self, _item_id: &str, _extend_seconds: u64) -> Result<bool> {
        self.extends.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn report(&self, item_id: &str, report: &TaskReport) -> Result<bool> {
        if self.fail_reports {
            return Err(WorkerError::QueueApi("report endpoint down".to_string()));
        }
        self.reports
            .lock()
            .unwrap()
            .push((item_id.to_string(), report.clone()));
        Ok(true)
    }
}

struct MockTransfer;

#[async_trait]
impl ArtifactTransfer for MockTransfer {
    async fn download_ref(&self, storage_path: &str) -> Result<String> {
        Ok(format!("https://signed.example/{storage_path}"))
    }

    async fn upload_ref(&self, item_id: &str, extension: &str) -> Result<UploadRef> {
        Ok(UploadRef {
            url: format!("https://signed.example/upload/{item_id}"),
            storage_path: format!("videos/{item_id}.{extension}"),
        })
    }

    async fn push(&self, local_path: &Path, _upload_url: &str, _content_type: &str) -> Result<()> {
        assert!(
            local_path.exists(),
            "push called before the artifact was written"
        );
        Ok(())
    }
}

enum GenBehavior {
    /// Write the artifact immediately.
    Succeed,
    /// Run for this long before writing the artifact.
    Block(Duration),
    /// Fail without producing anything.
    Fail,
    /// Write a partial artifact, then fail.
    FailAfterWrite,
    /// Distinguished deadline failure.
    Timeout,
}

struct MockGeneration {
    behavior: GenBehavior,
    last_request: Mutex<Option<GenerationRequest>>,
}

impl MockGeneration {
    fn new(behavior: GenBehavior) -> Self {
        Self {
            behavior,
            last_request: Mutex::new(None),
        }
    }

    fn last_request(&self) -> Option<GenerationRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationService for MockGeneration {
    async fn generate(&self, request: &GenerationRequest, output_path: &Path) -> Result<()> {
        *self.last_request.lock().unwrap() = Some(request.clone());
        match &self.behavior {
            GenBehavior::Succeed => {
                std::fs::write(output_path, b"clip")?;
                Ok(())
            }
            GenBehavior::Block(duration) => {
                sleep(*duration).await;
                std::fs::write(output_path, b"clip")?;
                Ok(())
            }
            GenBehavior::Fail => Err(WorkerError::Generation("render exploded".to_string())),
            GenBehavior::FailAfterWrite => {
                std::fs::write(output_path, b"partial")?;
                Err(WorkerError::Generation("render exploded".to_string()))
            }
            GenBehavior::Timeout => Err(WorkerError::GenerationTimeout {
                task_id: "job-1".to_string(),
                timeout: Duration::from_secs(600),
            }),
        }
    }
}

struct Harness {
    queue: Arc<MockQueue>,
    generation: Arc<MockGeneration>,
    processor: TaskProcessor,
    temp_dir: tempfile::TempDir,
}

fn harness(queue: MockQueue, behavior: GenBehavior, auto_cleanup: bool) -> Harness {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = {
        let mut c = test_config(temp_dir.path());
        c.auto_cleanup = auto_cleanup;
        c
    };
    let queue = Arc::new(queue);
    let generation = Arc::new(MockGeneration::new(behavior));
    let processor = TaskProcessor::new(
        config,
        queue.clone(),
        Arc::new(MockTransfer),
        generation.clone(),
    );
    Harness {
        queue,
        generation,
        processor,
        temp_dir,
    }
}

fn artifact_path(h: &Harness, item_id: &str) -> PathBuf {
    h.temp_dir.path().join(format!("{item_id}_output.mp4"))
}

#[tokio::test(start_paused = true)]
async fn success_extends_per_interval_and_reports_once() {
    // Generation blocks for just over two heartbeat intervals.
    let h = harness(
        MockQueue::default(),
        GenBehavior::Block(Duration::from_secs(250)),
        true,
    );
    let task = make_task("item-1", Some(72), "gen4_turbo");

    let outcome = h.processor.process(&task).await;
    assert_eq!(outcome, TaskOutcome::Succeeded);

    // One extend at 120s and one at 240s while the call was in flight.
    assert_eq!(h.queue.extend_count(), 2);

    let reports = h.queue.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].0, "item-1");
    assert_eq!(
        reports[0].1,
        TaskReport::Completed {
            video_storage_path: "videos/item-1.mp4".to_string(),
        }
    );

    // 72 frames at 24fps.
    let request = h.generation.last_request().unwrap();
    assert_eq!(request.duration, 3.0);
    assert_eq!(request.prompt, "a quiet street at dawn");
    assert_eq!(
        request.input_image_url,
        "https://signed.example/photos/item-1.jpg"
    );

    // Cleanup enabled: artifact removed after success.
    assert!(!artifact_path(&h, "item-1").exists());
}

#[tokio::test(start_paused = true)]
async fn foreign_provider_sends_nothing() {
    let h = harness(MockQueue::default(), GenBehavior::Succeed, true);
    let task = make_task("item-2", Some(72), "wan_local");

    let outcome = h.processor.process(&task).await;
    assert_eq!(outcome, TaskOutcome::Skipped);
    assert_eq!(h.queue.extend_count(), 0);
    assert!(h.queue.reports().is_empty());
    assert!(h.generation.last_request().is_none());
}

#[tokio::test(start_paused = true)]
async fn unknown_provider_is_skipped_not_failed() {
    let h = harness(MockQueue::default(), GenBehavior::Succeed, true);
    let task = make_task("item-3", None, "sora2");

    assert_eq!(h.processor.process(&task).await, TaskOutcome::Skipped);
    assert!(h.queue.reports().is_empty());
}

#[tokio::test(start_paused = true)]
async fn generation_failure_reports_failed_once() {
    let h = harness(MockQueue::default(), GenBehavior::Fail, true);
    let task = make_task("item-4", None, "gen4_turbo");

    let outcome = h.processor.process(&task).await;
    assert_eq!(outcome, TaskOutcome::Failed);

    let reports = h.queue.reports();
    assert_eq!(reports.len(), 1);
    match &reports[0].1 {
        TaskReport::Failed { error_message } => {
            assert!(error_message.contains("render exploded"));
        }
        other => panic!("expected a failure report, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn timeout_is_reported_as_failure() {
    let h = harness(MockQueue::default(), GenBehavior::Timeout, true);
    let task = make_task("item-5", None, "veo3.1");

    assert_eq!(h.processor.process(&task).await, TaskOutcome::Failed);
    let reports = h.queue.reports();
    assert_eq!(reports.len(), 1);
    match &reports[0].1 {
        TaskReport::Failed { error_message } => {
            assert!(error_message.contains("timed out"));
        }
        other => panic!("expected a failure report, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn failed_artifact_removed_when_cleanup_enabled() {
    let h = harness(MockQueue::default(), GenBehavior::FailAfterWrite, true);
    let task = make_task("item-6", None, "gen4_turbo");

    assert_eq!(h.processor.process(&task).await, TaskOutcome::Failed);
    assert!(!artifact_path(&h, "item-6").exists());
}

#[tokio::test(start_paused = true)]
async fn failed_artifact_kept_when_cleanup_disabled() {
    let h = harness(MockQueue::default(), GenBehavior::FailAfterWrite, false);
    let task = make_task("item-7", None, "gen4_turbo");

    assert_eq!(h.processor.process(&task).await, TaskOutcome::Failed);
    // Retained for post-mortem inspection.
    assert!(artifact_path(&h, "item-7").exists());
}

#[tokio::test(start_paused = true)]
async fn report_errors_never_escape_the_processor() {
    let queue = MockQueue {
        fail_reports: true,
        ..MockQueue::default()
    };
    let h = harness(queue, GenBehavior::Fail, true);
    let task = make_task("item-8", None, "gen4_turbo");

    // Both the pipeline error and the failed report are absorbed.
    assert_eq!(h.processor.process(&task).await, TaskOutcome::Failed);
}

#[tokio::test(start_paused = true)]
async fn idle_worker_polls_at_the_slow_interval() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = test_config(temp_dir.path());
    let queue = Arc::new(MockQueue::default());
    let generation = Arc::new(MockGeneration::new(GenBehavior::Succeed));
    let processor = TaskProcessor::new(
        config.clone(),
        queue.clone(),
        Arc::new(MockTransfer),
        generation,
    );
    let mut runner = TaskRunner::new(config, queue.clone(), processor);
    let shutdown = runner.shutdown_handle();

    let worker = tokio::spawn(async move { runner.run().await });

    // Polls land at t=0, 60, 120 with no prior completion.
    sleep(Duration::from_secs(125)).await;
    assert_eq!(queue.acquire_count(), 3);

    shutdown.store(true, Ordering::SeqCst);
    sleep(Duration::from_secs(60)).await;
    worker.await.unwrap().unwrap();

    assert_eq!(queue.extend_count(), 0);
    assert!(queue.reports().is_empty());
}

#[tokio::test(start_paused = true)]
async fn polling_accelerates_after_a_processed_task() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = test_config(temp_dir.path());
    let queue = Arc::new(MockQueue::with_tasks(vec![make_task(
        "item-9",
        Some(120),
        "gen4_turbo",
    )]));
    let generation = Arc::new(MockGeneration::new(GenBehavior::Succeed));
    let processor = TaskProcessor::new(
        config.clone(),
        queue.clone(),
        Arc::new(MockTransfer),
        generation,
    );
    let mut runner = TaskRunner::new(config, queue.clone(), processor);
    let shutdown = runner.shutdown_handle();

    let worker = tokio::spawn(async move { runner.run().await });

    // t=0: task claimed and processed instantly, then a 1s pause; idle polls
    // follow at the fast interval: t=1, 6, 11.
    sleep(Duration::from_secs(13)).await;
    assert_eq!(queue.acquire_count(), 4);

    shutdown.store(true, Ordering::SeqCst);
    sleep(Duration::from_secs(10)).await;
    worker.await.unwrap().unwrap();

    let reports = queue.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(
        reports[0].1,
        TaskReport::Completed {
            video_storage_path: "videos/item-9.mp4".to_string(),
        }
    );
}

#[tokio::test(start_paused = true)]
async fn skipped_task_still_counts_as_activity() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = test_config(temp_dir.path());
    let queue = Arc::new(MockQueue::with_tasks(vec![make_task(
        "item-10",
        None,
        "wan_local",
    )]));
    let generation = Arc::new(MockGeneration::new(GenBehavior::Succeed));
    let processor = TaskProcessor::new(
        config.clone(),
        queue.clone(),
        Arc::new(MockTransfer),
        generation,
    );
    let mut runner = TaskRunner::new(config, queue.clone(), processor);
    let shutdown = runner.shutdown_handle();

    let worker = tokio::spawn(async move { runner.run().await });

    // Skip at t=0, then fast polling: acquires at t=1, 6, 11.
    sleep(Duration::from_secs(13)).await;
    assert_eq!(queue.acquire_count(), 4);
    assert!(queue.reports().is_empty());
    assert_eq!(queue.extend_count(), 0);

    shutdown.store(true, Ordering::SeqCst);
    sleep(Duration::from_secs(10)).await;
    worker.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn run_once_reports_whether_a_task_was_processed() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = test_config(temp_dir.path());
    let queue = Arc::new(MockQueue::with_tasks(vec![make_task(
        "item-11",
        Some(240),
        "gen4_turbo",
    )]));
    let generation = Arc::new(MockGeneration::new(GenBehavior::Succeed));
    let processor = TaskProcessor::new(
        config.clone(),
        queue.clone(),
        Arc::new(MockTransfer),
        generation.clone(),
    );
    let mut runner = TaskRunner::new(config, queue.clone(), processor);

    assert!(runner.run_once().await.unwrap());
    assert!(!runner.run_once().await.unwrap());

    // 240 frames clamps to the 10s ceiling.
    assert_eq!(generation.last_request().unwrap().duration, 10.0);
    assert_eq!(queue.reports().len(), 1);
}
