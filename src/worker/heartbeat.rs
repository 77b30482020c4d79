//! Lease heartbeat
//!
//! While a task is in flight a background task periodically extends its
//! lease. The keeper shares nothing with the pipeline beyond the item id and
//! a cancellation token; extension failures never abort the task — the
//! pipeline's own completion path is the sole source of truth.

use crate::queue::LeaseClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Bound on how long `stop` waits for the renewal loop to acknowledge. A loop
/// stuck in a slow extend call is abandoned; the lease expires server-side.
const STOP_WAIT: Duration = Duration::from_secs(1);

/// Spawns one renewal loop per in-flight task.
pub struct HeartbeatKeeper {
    queue: Arc<dyn LeaseClient>,
    interval: Duration,
    extend: Duration,
}

impl HeartbeatKeeper {
    pub fn new(queue: Arc<dyn LeaseClient>, interval: Duration, extend: Duration) -> Self {
        Self {
            queue,
            interval,
            extend,
        }
    }

    /// Start the renewal loop for an item. The caller must `stop` the
    /// returned handle before processing the next task.
    pub fn start(&self, item_id: &str) -> HeartbeatHandle {
        let token = CancellationToken::new();
        let loop_token = token.clone();
        let queue = Arc::clone(&self.queue);
        let item_id = item_id.to_string();
        let interval = self.interval;
        let extend_secs = self.extend.as_secs();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = sleep(interval) => {
                        match queue.extend(&item_id, extend_secs).await {
                            Ok(true) => {
                                info!("[HEARTBEAT] Lease extended for item {}", item_id);
                            }
                            Ok(false) => {
                                warn!("[HEARTBEAT] Extension declined for item {}", item_id);
                            }
                            Err(e) => {
                                warn!("[HEARTBEAT] Extension failed for item {}: {}", item_id, e);
                            }
                        }
                    }
                }
            }
        });

        HeartbeatHandle { token, handle }
    }
}

/// Running renewal loop for one item.
pub struct HeartbeatHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl HeartbeatHandle {
    /// Signal the loop to exit and wait briefly for acknowledgment. Once this
    /// returns after a clean join, no further extend calls are issued.
    pub async fn stop(self) {
        self.token.cancel();
        if tokio::time::timeout(STOP_WAIT, self.handle).await.is_err() {
            warn!("Heartbeat loop did not stop in time, abandoning it");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, WorkerError};
    use crate::queue::{Task, TaskReport};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingQueue {
        extends: AtomicUsize,
        fail_extends: bool,
    }

    impl CountingQueue {
        fn extend_count(&self) -> usize {
            self.extends.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LeaseClient for CountingQueue {
        async fn acquire(&self, _lease_seconds: u64) -> Result<Option<Task>> {
            Ok(None)
        }

        async fn extend(&self, _item_id: &str, _extend_seconds: u64) -> Result<bool> {
            self.extends.fetch_add(1, Ordering::SeqCst);
            if self.fail_extends {
                Err(WorkerError::QueueApi("heartbeat rejected".to_string()))
            } else {
                Ok(true)
            }
        }

        async fn report(&self, _item_id: &str, _report: &TaskReport) -> Result<bool> {
            Ok(true)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn extends_once_per_interval() {
        let queue = Arc::new(CountingQueue::default());
        let keeper = HeartbeatKeeper::new(
            queue.clone(),
            Duration::from_secs(120),
            Duration::from_secs(300),
        );

        let hb = keeper.start("item-1");
        tokio::time::sleep(Duration::from_secs(361)).await;
        assert_eq!(queue.extend_count(), 3);
        hb.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn no_extends_after_stop_returns() {
        let queue = Arc::new(CountingQueue::default());
        let keeper = HeartbeatKeeper::new(
            queue.clone(),
            Duration::from_secs(120),
            Duration::from_secs(300),
        );

        let hb = keeper.start("item-1");
        tokio::time::sleep(Duration::from_secs(130)).await;
        hb.stop().await;

        let count = queue.extend_count();
        assert_eq!(count, 1);

        // Long after stop, nothing further was issued.
        tokio::time::sleep(Duration::from_secs(1200)).await;
        assert_eq!(queue.extend_count(), count);
    }

    #[tokio::test(start_paused = true)]
    async fn extension_failures_do_not_stop_the_loop() {
        let queue = Arc::new(CountingQueue {
            extends: AtomicUsize::new(0),
            fail_extends: true,
        });
        let keeper = HeartbeatKeeper::new(
            queue.clone(),
            Duration::from_secs(120),
            Duration::from_secs(300),
        );

        let hb = keeper.start("item-1");
        tokio::time::sleep(Duration::from_secs(481)).await;
        // Four intervals, four attempts despite every one failing.
        assert_eq!(queue.extend_count(), 4);
        hb.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_first_interval_sends_nothing() {
        let queue = Arc::new(CountingQueue::default());
        let keeper = HeartbeatKeeper::new(
            queue.clone(),
            Duration::from_secs(120),
            Duration::from_secs(300),
        );

        let hb = keeper.start("item-1");
        tokio::time::sleep(Duration::from_secs(30)).await;
        hb.stop().await;
        assert_eq!(queue.extend_count(), 0);
    }
}
