//! Adaptive poll scheduling
//!
//! Work tends to arrive in bursts: after any processed task the worker polls
//! at the fast interval for a window, then falls back to the slow interval.
//! State is a single timestamp and is never persisted across restarts.

use std::time::{Duration, Instant};

pub struct PollScheduler {
    slow: Duration,
    fast: Duration,
    fast_window: Duration,
    /// When the last task finished processing, if any this run. Skipped and
    /// failed tasks count as activity too.
    last_activity: Option<Instant>,
}

impl PollScheduler {
    pub fn new(slow: Duration, fast: Duration, fast_window: Duration) -> Self {
        Self {
            slow,
            fast,
            fast_window,
            last_activity: None,
        }
    }

    /// Interval to wait before the next poll when the queue is idle.
    pub fn next_interval(&self) -> Duration {
        self.interval_at(Instant::now())
    }

    /// Mark that a task was just processed.
    pub fn record_activity(&mut self) {
        self.record_activity_at(Instant::now());
    }

    fn interval_at(&self, now: Instant) -> Duration {
        match self.last_activity {
            Some(last) if now.duration_since(last) < self.fast_window => self.fast,
            _ => self.slow,
        }
    }

    fn record_activity_at(&mut self, now: Instant) {
        self.last_activity = Some(now);
    }
}
