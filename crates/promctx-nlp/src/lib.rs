//! # promctx nlp
//!
//! Resolves candidate tokens extracted from a natural-language question into
//! a scored relevance context of metrics, labels and values, enriches it with
//! prior history, and drives query generation.

pub mod candidates;
pub mod engine;
pub mod error;
pub mod history;
pub mod resolver;

pub use candidates::{CandidateTokens, ParsedCandidates, ValidationWarning};
pub use engine::{QueryContext, QueryPipeline, DEFAULT_GENERATION_BATCH_SIZE};
pub use error::{ResolveError, Result};
pub use history::collect_history;
pub use resolver::{RelevanceResolver, Resolution};
