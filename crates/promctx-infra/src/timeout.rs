//! Timeout and cancellation guard for external calls
//!
//! Every call to the synonym provider or the monitoring store goes through a
//! [`CallGuard`]: it is bounded by a deadline and aborted as soon as the
//! parent operation is cancelled.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Why a guarded call did not produce a value
#[derive(Debug, thiserror::Error)]
pub enum GuardError<E> {
    /// The call itself returned an error
    #[error("{0}")]
    Failed(E),

    /// The deadline passed first
    #[error("Operation '{operation}' timed out after {after:?}")]
    TimedOut { operation: String, after: Duration },

    /// The parent operation was cancelled
    #[error("Operation '{operation}' was cancelled")]
    Cancelled { operation: String },
}

impl<E> GuardError<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, GuardError::Cancelled { .. })
    }

    /// Maps the inner call error, keeping timeout and cancellation as they are.
    pub fn map_failed<F>(self, f: impl FnOnce(E) -> F) -> GuardError<F> {
        match self {
            GuardError::Failed(e) => GuardError::Failed(f(e)),
            GuardError::TimedOut { operation, after } => GuardError::TimedOut { operation, after },
            GuardError::Cancelled { operation } => GuardError::Cancelled { operation },
        }
    }
}

/// Deadline applied to every guarded call
#[derive(Debug, Clone)]
pub struct CallGuard {
    timeout: Duration,
}

impl Default for CallGuard {
    fn default() -> Self {
        Self::new(Duration::from_secs(120))
    }
}

impl CallGuard {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs `call` until it completes, the deadline passes, or `cancel` fires.
    pub async fn run<F, T, E>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        call: F,
    ) -> Result<T, GuardError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(operation = operation, "Operation cancelled");
                Err(GuardError::Cancelled { operation: operation.to_string() })
            }
            result = tokio::time::timeout(self.timeout, call) => match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(GuardError::Failed(e)),
                Err(_) => {
                    warn!(
                        operation = operation,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Operation timed out"
                    );
                    Err(GuardError::TimedOut {
                        operation: operation.to_string(),
                        after: self.timeout,
                    })
                }
            }
        }
    }
}
