//! Pipeline error types.

use thiserror::Error;

/// Pipeline error type.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Record store error
    #[error("Storage error: {0}")]
    Storage(#[from] event_store::StorageError),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (executor thread spawn)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The store executor has shut down
    #[error("Store executor is closed")]
    ExecutorClosed,

    /// The transmission executor refused a batch
    #[error("Batch submission rejected: {0}")]
    SubmissionRejected(String),
}

/// Result type alias using PipelineError.
pub type PipelineResult<T> = Result<T, PipelineError>;
