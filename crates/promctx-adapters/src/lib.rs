//! Concrete collaborators: a Prometheus HTTP API client and an
//! OpenAI-compatible chat-completions client, plus the prompt templates the
//! latter renders.

pub mod openai;
pub mod prometheus;
pub mod prompts;

pub use openai::ChatCompletionsClient;
pub use prometheus::PrometheusClient;
pub use prompts::PromptSet;

use promctx_core::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Unexpected status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("API error: {0}")]
    Api(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AdapterResult<T> = Result<T, AdapterError>;

impl AdapterError {
    /// Converts into the collaborator error reported to the core, naming the
    /// service that failed.
    pub fn into_core(self, service: &str) -> CoreError {
        match self {
            AdapterError::SerializationError(msg) => CoreError::serialization(msg),
            AdapterError::Io(e) => CoreError::Io(e),
            other => CoreError::external(service, other.to_string()),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub message: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl HealthStatus {
    pub fn healthy(message: impl Into<String>) -> Self {
        Self {
            healthy: true,
            message: message.into(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            message: message.into(),
            timestamp: chrono::Utc::now(),
        }
    }
}
