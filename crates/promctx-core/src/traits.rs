//! Collaborator interfaces.
//!
//! The index builder and the resolver only talk to the outside world through
//! these traits. Concrete HTTP implementations live in `promctx-adapters`;
//! tests provide in-memory fakes.

use crate::error::Result;
use crate::types::{QueryGenerationRequest, RankedQuery, Series};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Generates vocabulary synonyms for canonical metric and label names.
#[async_trait]
pub trait SynonymProvider: Send + Sync {
    /// Synonyms for a batch of metric names, keyed by metric name.
    ///
    /// The batch maps each name to its description (empty when unknown).
    async fn generate_metric_synonyms(
        &self,
        batch: BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, Vec<String>>>;

    /// Synonyms for a batch of label names, keyed by label name.
    async fn generate_label_synonyms(
        &self,
        batch: Vec<String>,
    ) -> Result<BTreeMap<String, Vec<String>>>;
}

/// Read access to the monitoring store's catalog.
#[async_trait]
pub trait MonitoringStore: Send + Sync {
    async fn list_metric_names(&self) -> Result<Vec<String>>;

    async fn list_label_names(&self) -> Result<Vec<String>>;

    /// Help text per metric name.
    async fn metric_descriptions(&self) -> Result<BTreeMap<String, String>>;

    /// Label sets of the series matched by an instant-vector selector.
    async fn query_label_combinations(&self, selector: &str) -> Result<Vec<Series>>;
}

/// Extracts candidate tokens from a natural-language question.
///
/// Returns the raw reply text. It should hold a JSON object with
/// `possible_metric_names`, `possible_label_names` and
/// `possible_label_values` arrays, possibly inside a code fence, but callers
/// must tolerate anything, including text that is not JSON at all.
/// Only transport failures are errors.
#[async_trait]
pub trait QueryUnderstanding: Send + Sync {
    async fn extract_candidates(&self, user_query: &str) -> Result<String>;
}

/// Turns a relevance context into ranked query strings.
#[async_trait]
pub trait QueryGenerator: Send + Sync {
    async fn generate_queries(&self, request: &QueryGenerationRequest) -> Result<Vec<RankedQuery>>;
}
