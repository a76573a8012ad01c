//! Candidate tokens extracted from a user question.
//!
//! The extraction step is a language model, so its payload is untrusted:
//! missing fields, wrong types and non-string elements are tolerated and
//! reported as warnings instead of failing the query.

use promctx_core::{normalize_token, strip_code_fences};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use tracing::warn;

pub const METRIC_FIELD: &str = "possible_metric_names";
pub const LABEL_FIELD: &str = "possible_label_names";
pub const VALUE_FIELD: &str = "possible_label_values";

/// Tokens to resolve, in the order they were extracted.
///
/// Repeats are kept because a repeated mention raises the match score.
/// Metric and label tokens are lowercased; value tokens keep their case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CandidateTokens {
    pub metric_tokens: Vec<String>,
    pub label_tokens: Vec<String>,
    pub value_tokens: Vec<String>,
}

/// A tolerated problem in the candidate payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
}

impl ValidationWarning {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedCandidates {
    pub tokens: CandidateTokens,
    pub warnings: Vec<ValidationWarning>,
}

impl CandidateTokens {
    pub fn new<M, L, V>(metrics: M, labels: L, values: V) -> Self
    where
        M: IntoIterator,
        M::Item: AsRef<str>,
        L: IntoIterator,
        L::Item: AsRef<str>,
        V: IntoIterator,
        V::Item: AsRef<str>,
    {
        Self {
            metric_tokens: metrics
                .into_iter()
                .filter_map(|t| normalize_token(t.as_ref()))
                .collect(),
            label_tokens: labels
                .into_iter()
                .filter_map(|t| normalize_token(t.as_ref()))
                .collect(),
            value_tokens: values
                .into_iter()
                .map(|t| t.as_ref().trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.metric_tokens.is_empty() && self.label_tokens.is_empty() && self.value_tokens.is_empty()
    }

    /// Reads the three candidate arrays out of an extraction payload.
    pub fn from_value(payload: &Value) -> ParsedCandidates {
        let mut warnings = Vec::new();

        let Some(object) = payload.as_object() else {
            warnings.push(ValidationWarning::new(
                "payload",
                format!("expected an object, got {}", kind(payload)),
            ));
            return ParsedCandidates {
                tokens: Self::default(),
                warnings,
            };
        };

        let mut field = |name: &str| -> Vec<String> {
            match object.get(name) {
                None | Some(Value::Null) => {
                    warnings.push(ValidationWarning::new(name, "missing"));
                    Vec::new()
                }
                Some(Value::Array(items)) => items
                    .iter()
                    .enumerate()
                    .filter_map(|(i, item)| match item.as_str() {
                        Some(s) => Some(s.to_string()),
                        None => {
                            warnings.push(ValidationWarning::new(
                                name,
                                format!("element {} is {}, not a string", i, kind(item)),
                            ));
                            None
                        }
                    })
                    .collect(),
                Some(other) => {
                    warnings.push(ValidationWarning::new(
                        name,
                        format!("expected an array, got {}", kind(other)),
                    ));
                    Vec::new()
                }
            }
        };

        let metrics = field(METRIC_FIELD);
        let labels = field(LABEL_FIELD);
        let values = field(VALUE_FIELD);

        ParsedCandidates {
            tokens: Self::new(metrics, labels, values),
            warnings,
        }
    }

    /// Parses raw model output, unwrapping a Markdown code fence first.
    pub fn from_json_str(raw: &str) -> ParsedCandidates {
        match serde_json::from_str::<Value>(strip_code_fences(raw)) {
            Ok(payload) => Self::from_value(&payload),
            Err(e) => {
                warn!(error = %e, "Candidate payload is not JSON");
                ParsedCandidates {
                    tokens: Self::default(),
                    warnings: vec![ValidationWarning::new("payload", format!("invalid JSON: {}", e))],
                }
            }
        }
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
