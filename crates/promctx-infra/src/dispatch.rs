//! Concurrent batch fan-out
//!
//! [`BatchDispatcher`] runs one worker per unit on its own tokio task, waits
//! for every worker to settle, and hands back the results in unit order so
//! callers can merge them deterministically.

use crate::timeout::{CallGuard, GuardError};
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default cap on simultaneously running workers.
pub const DEFAULT_MAX_CONCURRENCY: usize = 16;

/// Splits `items` into consecutive batches of at most `size` elements.
///
/// A zero `size` is treated as one.
pub fn batches<T: Clone>(items: &[T], size: usize) -> Vec<Vec<T>> {
    items.chunks(size.max(1)).map(|chunk| chunk.to_vec()).collect()
}

/// How a single worker failed
#[derive(Debug, Clone, PartialEq)]
pub enum FailureKind<E> {
    Failed(E),
    TimedOut(Duration),
    Cancelled,
    Panicked(String),
}

/// A worker failure tagged with the position of its unit
#[derive(Debug, Clone, PartialEq)]
pub struct BatchFailure<E> {
    pub position: usize,
    pub kind: FailureKind<E>,
}

impl<E: fmt::Display> fmt::Display for BatchFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FailureKind::Failed(e) => write!(f, "batch {} failed: {}", self.position, e),
            FailureKind::TimedOut(after) => {
                write!(f, "batch {} timed out after {:?}", self.position, after)
            }
            FailureKind::Cancelled => write!(f, "batch {} was cancelled", self.position),
            FailureKind::Panicked(msg) => {
                write!(f, "batch {} panicked: {}", self.position, msg)
            }
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for BatchFailure<E> {}

/// What a call site does with a partially failed dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Any failure fails the whole call
    FailFast,
    /// Keep the successful batches and drop the rest
    KeepPartial,
}

/// Results of a dispatch, ordered by unit position
#[derive(Debug)]
pub struct DispatchOutcome<T, E> {
    results: Vec<Result<T, BatchFailure<E>>>,
}

impl<T, E> DispatchOutcome<T, E> {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn successes(&self) -> impl Iterator<Item = (usize, &T)> {
        self.results
            .iter()
            .enumerate()
            .filter_map(|(pos, r)| r.as_ref().ok().map(|v| (pos, v)))
    }

    pub fn failures(&self) -> impl Iterator<Item = &BatchFailure<E>> {
        self.results.iter().filter_map(|r| r.as_ref().err())
    }

    /// The failure with the lowest position, if any.
    pub fn first_failure(&self) -> Option<&BatchFailure<E>> {
        self.failures().next()
    }

    pub fn is_complete(&self) -> bool {
        self.results.iter().all(Result::is_ok)
    }

    /// Splits into ordered successes and the first failure.
    pub fn into_parts(self) -> (Vec<(usize, T)>, Option<BatchFailure<E>>) {
        let mut successes = Vec::with_capacity(self.results.len());
        let mut first = None;
        for (pos, result) in self.results.into_iter().enumerate() {
            match result {
                Ok(value) => successes.push((pos, value)),
                Err(failure) if first.is_none() => first = Some(failure),
                Err(_) => {}
            }
        }
        (successes, first)
    }

    pub fn resolve(self, policy: FailurePolicy) -> Result<Vec<(usize, T)>, BatchFailure<E>> {
        let (successes, first) = self.into_parts();
        match (policy, first) {
            (FailurePolicy::FailFast, Some(failure)) => Err(failure),
            _ => Ok(successes),
        }
    }
}

/// Fans units out to concurrent workers
#[derive(Debug, Clone)]
pub struct BatchDispatcher {
    name: String,
    guard: CallGuard,
    max_concurrency: Option<usize>,
}

impl BatchDispatcher {
    pub fn new(name: impl Into<String>, guard: CallGuard) -> Self {
        Self {
            name: name.into(),
            guard,
            max_concurrency: Some(DEFAULT_MAX_CONCURRENCY),
        }
    }

    /// Caps simultaneously running workers. Zero removes the cap.
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = if max == 0 { None } else { Some(max) };
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs `work(position, unit)` for every unit and waits for all of them.
    pub async fn dispatch<U, T, E, F, Fut>(
        &self,
        units: Vec<U>,
        cancel: &CancellationToken,
        work: F,
    ) -> DispatchOutcome<T, E>
    where
        U: Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
        F: Fn(usize, U) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let total = units.len();
        debug!(dispatcher = %self.name, units = total, "Dispatching batches");

        let work = Arc::new(work);
        let semaphore = self.max_concurrency.map(|n| Arc::new(Semaphore::new(n)));
        let mut workers = JoinSet::new();

        for (position, unit) in units.into_iter().enumerate() {
            let work = Arc::clone(&work);
            let semaphore = semaphore.clone();
            let guard = self.guard.clone();
            let token = cancel.child_token();
            let operation = format!("{}[{}]", self.name, position);

            workers.spawn(async move {
                let _permit = match semaphore {
                    Some(sem) => tokio::select! {
                        biased;
                        _ = token.cancelled() => {
                            return (position, Err(FailureKind::Cancelled));
                        }
                        permit = sem.acquire_owned() => match permit {
                            Ok(permit) => Some(permit),
                            Err(_) => return (position, Err(FailureKind::Cancelled)),
                        },
                    },
                    None => None,
                };

                let call = async move {
                    match AssertUnwindSafe(async move { (*work)(position, unit).await })
                        .catch_unwind()
                        .await
                    {
                        Ok(Ok(value)) => Ok(value),
                        Ok(Err(e)) => Err(FailureKind::Failed(e)),
                        Err(payload) => Err(FailureKind::Panicked(panic_message(payload))),
                    }
                };

                let result = match guard.run(&operation, &token, call).await {
                    Ok(value) => Ok(value),
                    Err(GuardError::Failed(kind)) => Err(kind),
                    Err(GuardError::TimedOut { after, .. }) => Err(FailureKind::TimedOut(after)),
                    Err(GuardError::Cancelled { .. }) => Err(FailureKind::Cancelled),
                };
                (position, result)
            });
        }

        let mut slots: Vec<Option<Result<T, FailureKind<E>>>> =
            std::iter::repeat_with(|| None).take(total).collect();

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((position, result)) => slots[position] = Some(result),
                Err(e) => warn!(dispatcher = %self.name, error = %e, "Worker task terminated"),
            }
        }

        let results: Vec<_> = slots
            .into_iter()
            .enumerate()
            .map(|(position, slot)| {
                let result = slot.unwrap_or_else(|| {
                    Err(FailureKind::Panicked("worker terminated without a result".to_string()))
                });
                result.map_err(|kind| BatchFailure { position, kind })
            })
            .collect();

        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            warn!(dispatcher = %self.name, units = total, failed, "Dispatch finished with failures");
        } else {
            debug!(dispatcher = %self.name, units = total, "Dispatch finished");
        }

        DispatchOutcome { results }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
