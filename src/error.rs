//! Error taxonomy for the ingestion and retrieval pipeline.
//!
//! Expected failure modes are explicit variants; callers match on kind
//! rather than parsing messages. The HTTP layer translates these to status
//! codes in `server`; the core itself knows nothing about HTTP.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Debug, Error)]
pub enum RagError {
    /// Unrecognized file extension. Raised before any I/O on the file.
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    /// Attempted deletion of the reserved default space.
    #[error("space '{0}' is protected and cannot be deleted")]
    ProtectedSpace(String),

    /// Query or initialize against a space with no indexed units.
    #[error("space '{0}' has no indexed content")]
    SpaceNotReady(String),

    /// Store-layer read error (connection, malformed collection).
    #[error("retrieval failed: {0}")]
    RetrievalFailed(String),

    /// Store-layer write error.
    #[error("store write failed: {0}")]
    StoreFailed(String),

    /// Language-model call error.
    #[error("generation failed: {0}")]
    GenerationFailed(String),

    /// Embedding provider call error (non-timeout).
    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    /// Any external call exceeding its configured bound.
    #[error("{operation} timed out after {seconds}s")]
    UpstreamTimeout { operation: String, seconds: u64 },

    /// Text extraction from a binary document failed.
    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    /// Malformed caller input (bad space name, empty question, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RagError {
    /// Maps a reqwest failure to either a timeout or the given fallback kind.
    pub fn from_reqwest(e: reqwest::Error, operation: &str, timeout_secs: u64) -> Self {
        if e.is_timeout() {
            RagError::UpstreamTimeout {
                operation: operation.to_string(),
                seconds: timeout_secs,
            }
        } else if operation == "chat completion" {
            RagError::GenerationFailed(e.to_string())
        } else {
            RagError::EmbeddingFailed(e.to_string())
        }
    }
}
