//! # promctx core
//!
//! Shared data model for translating natural-language tokens into monitoring
//! store entities: the synonym index, the metric/label/value catalogs, the
//! history table, the scored relevance context, and the collaborator traits
//! the rest of the workspace is written against.

pub mod catalog;
pub mod config;
pub mod error;
pub mod index;
pub mod text;
pub mod traits;
pub mod types;

pub use catalog::{HistoryEntry, HistoryTable, KnowledgeBase, LabelValueCatalog, MetricLabelCatalog};
pub use config::{
    AppConfig, IndexConfig, LlmConfig, PromptConfig, PrometheusConfig, ResolverConfig, StorageConfig,
};
pub use error::{CoreError, Result};
pub use index::SynonymIndex;
pub use text::strip_code_fences;
pub use traits::{MonitoringStore, QueryGenerator, QueryUnderstanding, SynonymProvider};
pub use types::{
    normalize_token, HistoryContext, LabelContext, NameSet, QueryGenerationRequest, RankedQuery,
    RelevanceContext, Series, DEFAULT_MAX_SAMPLE_VALUES,
};

/// Reserved label carrying the metric name of a series.
pub const METRIC_NAME_LABEL: &str = "__name__";
