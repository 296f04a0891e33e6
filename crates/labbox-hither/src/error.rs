//! Error types for labbox-hither.

use std::time::Duration;

use thiserror::Error;

/// Result type for labbox-hither operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a job.
///
/// The type is `Clone` because a single terminal outcome is handed to every
/// caller waiting on the same job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The backend ran the function and reported a failure.
    #[error("{function_name} failed: {message}")]
    Backend {
        function_name: String,
        message: String,
    },

    /// The job was cancelled before it reached a terminal state.
    #[error("job was cancelled")]
    Cancelled,

    /// The task driving the job went away without recording an outcome.
    #[error("job was abandoned before completing")]
    Abandoned,

    /// The calculation pool was closed while the job waited for a slot.
    #[error("calculation pool {0} is closed")]
    PoolClosed(String),

    /// A caller-imposed deadline elapsed. The job itself keeps running.
    #[error("timed out after {0:?} waiting for job")]
    Timeout(Duration),
}

impl Error {
    /// The message stored on the job record when it enters the error state.
    pub fn error_message(&self) -> String {
        match self {
            Self::Backend { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}
