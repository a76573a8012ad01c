//! Resolution error types

use promctx_core::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResolveError {
    /// Persisted history could not be decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Query understanding failed: {0}")]
    Understanding(#[source] CoreError),

    #[error("Query generation failed: {0}")]
    Generation(#[source] CoreError),

    #[error("Query was cancelled")]
    Cancelled,
}

impl ResolveError {
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }
}

/// Result type for resolution
pub type Result<T> = std::result::Result<T, ResolveError>;

impl From<ResolveError> for CoreError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Serialization(msg) => CoreError::serialization(msg),
            ResolveError::Understanding(inner) | ResolveError::Generation(inner) => inner,
            ResolveError::Cancelled => CoreError::external("query-pipeline", "cancelled"),
        }
    }
}
