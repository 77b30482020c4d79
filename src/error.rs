//! Error types for i2v-worker

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Request to {endpoint} failed")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP error {status} from {endpoint}")]
    HttpStatus { endpoint: String, status: u16 },

    #[error("Queue API error: {0}")]
    QueueApi(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Generation task {task_id} timed out after {timeout:?}")]
    GenerationTimeout { task_id: String, timeout: Duration },

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("File system error")]
    Fs(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl WorkerError {
    /// True for the distinguished generation-deadline failure.
    pub fn is_generation_timeout(&self) -> bool {
        matches!(self, WorkerError::GenerationTimeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, WorkerError>;
