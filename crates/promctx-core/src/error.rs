//! Error taxonomy shared by every promctx crate.

use thiserror::Error;

/// Core error type.
///
/// Collaborator implementations (monitoring store, synonym provider, LLM
/// clients) report failures through this type so that the index builder and
/// the resolver can classify them without knowing the transport.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A call to an external collaborator failed.
    #[error("External service error ({service}): {message}")]
    ExternalService { service: String, message: String },

    /// A persisted document or a collaborator response could not be parsed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A payload had an unexpected shape.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub fn external(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalService {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Returns true for failures of an external collaborator.
    pub fn is_external(&self) -> bool {
        matches!(self, Self::ExternalService { .. })
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for CoreError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
