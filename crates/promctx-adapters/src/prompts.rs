//! Prompt templates for the chat-completions client.
//!
//! Each template carries a `{data}` placeholder that is replaced with the
//! request payload. Built-in defaults can be overridden per template by a
//! text file in the configured prompt directory.

use crate::AdapterResult;
use promctx_core::PromptConfig;
use std::path::Path;
use tracing::{debug, info};

pub const PLACEHOLDER: &str = "{data}";

pub const SYSTEM_PROMPT_FILE: &str = "system_prompt.txt";
pub const PROCESS_QUERY_PROMPT_FILE: &str = "process_query_prompt.txt";
pub const METRIC_SYNONYM_PROMPT_FILE: &str = "metric_synonym_prompt.txt";
pub const LABEL_SYNONYM_PROMPT_FILE: &str = "label_synonym_prompt.txt";

const DEFAULT_SYSTEM: &str = r#"You write PromQL for engineers who describe what they want in plain language.

You receive the user's question together with the metrics and labels that were
found relevant to it. Every metric comes with the labels it carries, a match
score and a few example values per label. Prior label assignments from earlier
questions may be included as history.

Rules:
- Only use metric names, label names and label values that appear in the input.
- Prefer higher-scored metrics and labels.
- Pick the aggregation or function (rate, sum, avg, topk, ...) the question implies.
- Return between one and five candidate queries.

Respond with a JSON array and nothing else. Each element is an object:
{"promql": "<query>", "score": <confidence between 0 and 1>, "metric_label_pairs": {"<metric>": {"<label>": "<value>"}}}
"#;

const DEFAULT_PROCESS_QUERY: &str = r#"Break the following monitoring question into terms that could name a
Prometheus metric, a label, or a label value.

Question: {data}

Guidelines:
1. For each term that could be a metric or a label, add single-word variants
   and synonyms someone might use in a monitoring setup.
2. Leave out stop words, punctuation and words that only describe an
   operation (sum, count, rate, total, average, top, all, ...).
3. Words qualifying a metric are label candidates.
4. Concrete values next to a label ("prod cluster", "api job") go into the
   value list as written.
5. A question may target labels and values only; the metric list may then
   stay empty.

Reply with one JSON object and no other text:
{"possible_metric_names": [...], "possible_label_names": [...], "possible_label_values": [...]}
"#;

const DEFAULT_METRIC_SYNONYM: &str = r#"The JSON object below maps Prometheus metric names to their help text.
For every metric, list single-word synonyms an operator could use when
asking about it. Split names on '_' and cover each meaningful part. Use the
help text to disambiguate. Give between five and ten distinct words per metric.

Metrics:
{data}

Reply with one JSON object and no other text, keyed by the exact metric
names from the input, each mapped to an array of lowercase words.
"#;

const DEFAULT_LABEL_SYNONYM: &str = r#"The JSON array below lists Prometheus label names. For every label, list
single-word synonyms an operator could use when filtering or grouping by it.
Split names on '_' and cover each meaningful part. Give between five and ten
distinct words per label.

Labels:
{data}

Reply with one JSON object and no other text, keyed by the exact label names
from the input, each mapped to an array of lowercase words.
"#;

#[derive(Debug, Clone, PartialEq)]
pub struct PromptSet {
    pub system: String,
    pub process_query: String,
    pub metric_synonym: String,
    pub label_synonym: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            system: DEFAULT_SYSTEM.to_string(),
            process_query: DEFAULT_PROCESS_QUERY.to_string(),
            metric_synonym: DEFAULT_METRIC_SYNONYM.to_string(),
            label_synonym: DEFAULT_LABEL_SYNONYM.to_string(),
        }
    }
}

impl PromptSet {
    /// Loads the prompt set, overriding defaults with any template files
    /// present in the configured directory.
    pub fn load(config: &PromptConfig) -> AdapterResult<Self> {
        let mut prompts = Self::default();
        let Some(dir) = config.dir.as_deref() else {
            return Ok(prompts);
        };

        override_from(dir, SYSTEM_PROMPT_FILE, &mut prompts.system)?;
        override_from(dir, PROCESS_QUERY_PROMPT_FILE, &mut prompts.process_query)?;
        override_from(dir, METRIC_SYNONYM_PROMPT_FILE, &mut prompts.metric_synonym)?;
        override_from(dir, LABEL_SYNONYM_PROMPT_FILE, &mut prompts.label_synonym)?;
        Ok(prompts)
    }
}

fn override_from(dir: &Path, file: &str, slot: &mut String) -> AdapterResult<()> {
    let path = dir.join(file);
    if !path.is_file() {
        debug!(path = %path.display(), "No prompt override, using default");
        return Ok(());
    }
    let content = std::fs::read_to_string(&path)?;
    info!(path = %path.display(), "Loaded prompt override");
    *slot = content;
    Ok(())
}

/// Substitutes `data` for every placeholder in `template`.
pub fn render(template: &str, data: &str) -> String {
    template.replace(PLACEHOLDER, data)
}
