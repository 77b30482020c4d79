//! I2V Worker - a lease-based worker for image-to-video generation
//!
//! This service polls a remote queue for leased tasks, drives the Runway
//! image-to-video API to completion for each one, uploads the resulting clip
//! through presigned URLs, and reports the outcome back to the queue.
//!
//! The core loop coordinates two independent timers against an unreliable
//! network: an adaptive poll cadence (fast after recent activity, slow when
//! idle) and a lease heartbeat that runs only while a task is in flight.
//! At most one task is processed at a time.

pub mod error;
pub mod monitor;
pub mod provider;
pub mod queue;
pub mod runway;
pub mod transfer;
pub mod worker;

pub use error::{Result, WorkerError};
pub use monitor::{IpWatcher, LivenessPinger, MonitorHandle};
pub use provider::Provider;
pub use queue::{LeaseClient, QueueClient, Task, TaskReport};
pub use runway::{GenerationRequest, GenerationService, RunwayClient};
pub use transfer::{content_type_for, ArtifactTransfer, PresignedTransfer, UploadRef};
pub use worker::{TaskOutcome, TaskProcessor, TaskRunner, WorkerConfig};
