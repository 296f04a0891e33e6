//! Error types for labbox-curation.

use thiserror::Error;

/// Result type for labbox-curation operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while decoding curation documents.
#[derive(Debug, Error)]
pub enum Error {
    /// The document was not valid JSON for the expected shape.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
