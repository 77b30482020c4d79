//! Worker module for lease-based task processing
//!
//! This module provides:
//! - TaskRunner: Main worker loop that polls the queue for leased tasks
//! - TaskProcessor: Processes individual tasks (generation + upload + report)
//! - HeartbeatKeeper: Extends the lease while a task is in flight
//! - PollScheduler: Adaptive slow/fast polling
//! - WorkerConfig: Configuration for the worker

pub mod config;
pub mod heartbeat;
pub mod processor;
pub mod runner;
pub mod scheduler;

pub use config::{WorkerConfig, WorkerConfigBuilder};
pub use heartbeat::{HeartbeatHandle, HeartbeatKeeper};
pub use processor::{TaskOutcome, TaskProcessor};
pub use runner::{setup_signal_handler, TaskRunner};
pub use scheduler::PollScheduler;
