//! Infrastructure for promctx: concurrent batch fan-out, timeout and
//! cancellation guards around external calls, and persistence of the
//! knowledge base.

pub mod dispatch;
pub mod store;
pub mod timeout;

pub use dispatch::{
    batches, BatchDispatcher, BatchFailure, DispatchOutcome, FailureKind, FailurePolicy,
};
pub use store::{json::JsonFileStore, memory::MemoryStore, KnowledgeStore};
pub use timeout::{CallGuard, GuardError};

pub use tokio_util::sync::CancellationToken;

use promctx_core::CoreError;

#[derive(Debug, thiserror::Error)]
pub enum InfraError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error in {document}: {message}")]
    Serialization { document: String, message: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl InfraError {
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    pub fn serialization(document: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Serialization {
            document: document.into(),
            message: message.into(),
        }
    }
}

impl From<InfraError> for CoreError {
    fn from(err: InfraError) -> Self {
        match err {
            InfraError::Io { source, .. } => CoreError::Io(source),
            InfraError::Serialization { .. } => CoreError::serialization(err.to_string()),
            InfraError::Unavailable(msg) => CoreError::external("knowledge-store", msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, InfraError>;
