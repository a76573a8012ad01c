//! Build errors

use crate::status::BuildStage;
use promctx_core::CoreError;
use promctx_infra::{BatchFailure, FailureKind, GuardError, InfraError};
use std::time::Duration;
use thiserror::Error;

fn batch_suffix(batch: &Option<usize>) -> String {
    batch.map(|b| format!(" (batch {})", b)).unwrap_or_default()
}

#[derive(Error, Debug)]
pub enum BuildError {
    /// A collaborator call failed.
    #[error("{stage}{}: {source}", batch_suffix(.batch))]
    ExternalService {
        stage: BuildStage,
        batch: Option<usize>,
        #[source]
        source: CoreError,
    },

    /// A collaborator response or persisted document could not be parsed.
    #[error("{stage}{}: serialization error: {message}", batch_suffix(.batch))]
    Serialization {
        stage: BuildStage,
        batch: Option<usize>,
        message: String,
    },

    #[error("{stage}{}: timed out after {after:?}", batch_suffix(.batch))]
    TimedOut {
        stage: BuildStage,
        batch: Option<usize>,
        after: Duration,
    },

    #[error("{stage}{}: worker panicked: {message}", batch_suffix(.batch))]
    Panicked {
        stage: BuildStage,
        batch: Option<usize>,
        message: String,
    },

    #[error("Build cancelled during {stage}")]
    Cancelled { stage: BuildStage },

    #[error("{stage}: knowledge store error: {source}")]
    Store {
        stage: BuildStage,
        #[source]
        source: InfraError,
    },

    #[error("A build is already running")]
    AlreadyRunning,
}

impl BuildError {
    pub(crate) fn from_core(stage: BuildStage, batch: Option<usize>, err: CoreError) -> Self {
        match err {
            CoreError::Serialization(message) => Self::Serialization {
                stage,
                batch,
                message,
            },
            other => Self::ExternalService {
                stage,
                batch,
                source: other,
            },
        }
    }

    pub(crate) fn from_guard(stage: BuildStage, err: GuardError<CoreError>) -> Self {
        match err {
            GuardError::Failed(e) => Self::from_core(stage, None, e),
            GuardError::TimedOut { after, .. } => Self::TimedOut {
                stage,
                batch: None,
                after,
            },
            GuardError::Cancelled { .. } => Self::Cancelled { stage },
        }
    }

    pub(crate) fn from_batch(stage: BuildStage, failure: BatchFailure<CoreError>) -> Self {
        let batch = Some(failure.position);
        match failure.kind {
            FailureKind::Failed(e) => Self::from_core(stage, batch, e),
            FailureKind::TimedOut(after) => Self::TimedOut {
                stage,
                batch,
                after,
            },
            FailureKind::Cancelled => Self::Cancelled { stage },
            FailureKind::Panicked(message) => Self::Panicked {
                stage,
                batch,
                message,
            },
        }
    }

    /// The stage the build failed in, if it got that far.
    pub fn stage(&self) -> Option<BuildStage> {
        match self {
            Self::ExternalService { stage, .. }
            | Self::Serialization { stage, .. }
            | Self::TimedOut { stage, .. }
            | Self::Panicked { stage, .. }
            | Self::Cancelled { stage }
            | Self::Store { stage, .. } => Some(*stage),
            Self::AlreadyRunning => None,
        }
    }

    /// Position of the failing batch, for batched stages.
    pub fn batch(&self) -> Option<usize> {
        match self {
            Self::ExternalService { batch, .. }
            | Self::Serialization { batch, .. }
            | Self::TimedOut { batch, .. }
            | Self::Panicked { batch, .. } => *batch,
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, BuildError>;
