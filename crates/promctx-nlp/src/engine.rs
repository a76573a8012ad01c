//! Query pipeline.
//!
//! Orchestrates candidate extraction, relevance resolution against the
//! published knowledge base, and query generation.

use crate::candidates::{CandidateTokens, ValidationWarning};
use crate::error::{ResolveError, Result};
use crate::resolver::RelevanceResolver;
use promctx_core::{
    CoreError, HistoryContext, LabelContext, QueryGenerationRequest, QueryGenerator, QueryUnderstanding,
    RankedQuery, RelevanceContext,
};
use promctx_index::SnapshotHandle;
use promctx_infra::{
    batches, BatchDispatcher, CallGuard, CancellationToken, FailurePolicy, GuardError,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Relevant metrics or labels sent to one generation call.
pub const DEFAULT_GENERATION_BATCH_SIZE: usize = 5;

/// Everything derived from one user question before query generation
#[derive(Debug, Clone, Serialize)]
pub struct QueryContext {
    pub user_query: String,
    pub candidates: CandidateTokens,
    pub warnings: Vec<ValidationWarning>,
    pub relevance: RelevanceContext,
    pub history: HistoryContext,
}

impl QueryContext {
    /// Splits the context into generation requests: metrics and labels are
    /// sent separately, `batch_size` entries at a time.
    pub fn generation_requests(&self, batch_size: usize) -> Vec<QueryGenerationRequest> {
        let metrics: Vec<_> = self.relevance.relevant_metrics.iter().collect();
        let labels: Vec<_> = self.relevance.relevant_labels.iter().collect();

        let mut requests = Vec::new();
        for chunk in batches(&metrics, batch_size) {
            requests.push(self.request(collect(chunk), BTreeMap::new()));
        }
        for chunk in batches(&labels, batch_size) {
            requests.push(self.request(BTreeMap::new(), collect(chunk)));
        }
        requests
    }

    fn request(
        &self,
        relevant_metrics: BTreeMap<String, BTreeMap<String, LabelContext>>,
        relevant_labels: BTreeMap<String, LabelContext>,
    ) -> QueryGenerationRequest {
        QueryGenerationRequest {
            user_query: self.user_query.clone(),
            relevant_metrics,
            relevant_labels,
            history: self.history.clone(),
        }
    }
}

fn collect<V: Clone>(chunk: Vec<(&String, &V)>) -> BTreeMap<String, V> {
    chunk.into_iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

/// Natural-language question to ranked queries
pub struct QueryPipeline {
    understanding: Arc<dyn QueryUnderstanding>,
    generator: Arc<dyn QueryGenerator>,
    snapshot: SnapshotHandle,
    resolver: RelevanceResolver,
    guard: CallGuard,
    generation_batch_size: usize,
}

impl QueryPipeline {
    pub fn new(
        understanding: Arc<dyn QueryUnderstanding>,
        generator: Arc<dyn QueryGenerator>,
        snapshot: SnapshotHandle,
        resolver: RelevanceResolver,
    ) -> Self {
        Self {
            understanding,
            generator,
            snapshot,
            resolver,
            guard: CallGuard::default(),
            generation_batch_size: DEFAULT_GENERATION_BATCH_SIZE,
        }
    }

    pub fn with_call_guard(mut self, guard: CallGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_generation_batch_size(mut self, size: usize) -> Self {
        self.generation_batch_size = size.max(1);
        self
    }

    /// Extracts candidates and resolves them against the current snapshot.
    ///
    /// A reply that is not a well-formed candidate payload degrades to empty
    /// fields with warnings. Transport failures, the call deadline and
    /// cancellation fail the call.
    #[instrument(skip(self, cancel))]
    pub async fn process(&self, user_query: &str, cancel: &CancellationToken) -> Result<QueryContext> {
        let reply = self
            .guard
            .run(
                "query_understanding",
                &cancel.child_token(),
                self.understanding.extract_candidates(user_query),
            )
            .await
            .map_err(|e| match e {
                GuardError::Failed(inner) => ResolveError::Understanding(inner),
                GuardError::Cancelled { .. } => ResolveError::Cancelled,
                timed_out @ GuardError::TimedOut { .. } => ResolveError::Understanding(
                    CoreError::external("query-understanding", timed_out.to_string()),
                ),
            })?;

        let parsed = CandidateTokens::from_json_str(&reply);
        for warning in &parsed.warnings {
            warn!(warning = %warning, "Tolerating malformed candidate payload");
        }

        let knowledge = self.snapshot.current();
        let resolution = self.resolver.resolve(&parsed.tokens, &knowledge)?;

        debug!(
            metrics = resolution.context.relevant_metrics.len(),
            labels = resolution.context.relevant_labels.len(),
            "Query resolved"
        );

        Ok(QueryContext {
            user_query: user_query.to_string(),
            candidates: parsed.tokens,
            warnings: parsed.warnings,
            relevance: resolution.context,
            history: resolution.history,
        })
    }

    /// Generates ranked queries for a question, best first.
    ///
    /// Generation runs per batch of relevant metrics or labels. Failed
    /// batches are dropped; the call only fails when every batch failed.
    #[instrument(skip(self, cancel))]
    pub async fn answer(&self, user_query: &str, cancel: &CancellationToken) -> Result<Vec<RankedQuery>> {
        let context = self.process(user_query, cancel).await?;
        let requests = context.generation_requests(self.generation_batch_size);
        if requests.is_empty() {
            info!("Nothing relevant found, no queries generated");
            return Ok(Vec::new());
        }

        let total = requests.len();
        let generator = Arc::clone(&self.generator);
        let outcome = BatchDispatcher::new("query_generation", self.guard.clone())
            .dispatch(requests, cancel, move |_, request| {
                let generator = Arc::clone(&generator);
                async move { generator.generate_queries(&request).await }
            })
            .await;

        let first_failure = outcome.first_failure().map(|f| f.to_string());
        let successes = outcome
            .resolve(FailurePolicy::KeepPartial)
            .unwrap_or_default();

        if successes.is_empty() {
            if cancel.is_cancelled() {
                return Err(ResolveError::Cancelled);
            }
            if let Some(failure) = first_failure {
                return Err(ResolveError::Generation(CoreError::external(
                    "query-generation",
                    failure,
                )));
            }
        } else if let Some(failure) = first_failure {
            warn!(failed = %failure, batches = total, "Keeping partial query generation results");
        }

        let mut queries: Vec<RankedQuery> = successes.into_iter().flat_map(|(_, q)| q).collect();
        queries.sort_by(|a, b| b.score.total_cmp(&a.score));
        info!(queries = queries.len(), "Queries generated");
        Ok(queries)
    }
}
