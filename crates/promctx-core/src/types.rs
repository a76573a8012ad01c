use serde::{Deserialize, Serialize};
use std::collections::btree_set;
use std::collections::{BTreeMap, BTreeSet};

/// Default number of sample values carried per label.
pub const DEFAULT_MAX_SAMPLE_VALUES: usize = 5;

/// Normalizes a vocabulary token for lookup or insertion.
///
/// Returns `None` when nothing is left after trimming.
pub fn normalize_token(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

/// Ordered set of names with union-merge semantics.
///
/// Iteration is always lexicographic so anything sliced out of a set
/// (sample values, batches) is reproducible.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NameSet(BTreeSet<String>);

impl NameSet {
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    /// Adds a name, returning true if it was not present yet.
    pub fn add(&mut self, name: impl Into<String>) -> bool {
        self.0.insert(name.into())
    }

    pub fn extend<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0.extend(names.into_iter().map(Into::into));
    }

    /// Union-merges another set into this one.
    pub fn union_with(&mut self, other: &NameSet) {
        self.0.extend(other.0.iter().cloned());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_set::Iter<'_, String> {
        self.0.iter()
    }

    pub fn to_sorted_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }

    /// The first `n` names in sorted order.
    pub fn first_n(&self, n: usize) -> Vec<String> {
        self.0.iter().take(n).cloned().collect()
    }

    /// Finds a member equal to `needle`, falling back to an ASCII
    /// case-insensitive match. Returns the member's own spelling.
    pub fn find_ignore_case(&self, needle: &str) -> Option<&str> {
        if let Some(exact) = self.0.get(needle) {
            return Some(exact.as_str());
        }
        self.0
            .iter()
            .find(|candidate| candidate.eq_ignore_ascii_case(needle))
            .map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for NameSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl<'a> IntoIterator for &'a NameSet {
    type Item = &'a String;
    type IntoIter = btree_set::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Match score and example values for one label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelContext {
    pub match_score: f64,
    /// At most `max_sample_values` entries; values matched from the user's
    /// query come first, sampled catalog values fill the rest.
    #[serde(rename = "values")]
    pub sample_values: Vec<String>,
    #[serde(skip)]
    pinned: usize,
}

impl LabelContext {
    /// Context for a label matched by name, sampled from its catalog values.
    pub fn sampled(values: &NameSet, max_samples: usize) -> Self {
        Self {
            match_score: 1.0,
            sample_values: values.first_n(max_samples),
            pinned: 0,
        }
    }

    /// Context for a label discovered only through one of its values.
    pub fn matched(value: impl Into<String>) -> Self {
        Self {
            match_score: 1.0,
            sample_values: vec![value.into()],
            pinned: 1,
        }
    }

    pub fn bump(&mut self, weight: f64) {
        self.match_score += weight;
    }

    /// Number of leading values that came from value matches.
    pub fn pinned_count(&self) -> usize {
        self.pinned
    }

    /// Records a matched value ahead of the sampled filler values.
    ///
    /// Returns true if the value list changed.
    pub fn pin_value(&mut self, value: &str, max_samples: usize) -> bool {
        if let Some(pos) = self.sample_values.iter().position(|v| v == value) {
            if pos < self.pinned {
                return false;
            }
            let existing = self.sample_values.remove(pos);
            self.sample_values.insert(self.pinned, existing);
            self.pinned += 1;
            return true;
        }
        if self.pinned >= max_samples {
            return false;
        }
        self.sample_values.insert(self.pinned, value.to_string());
        self.pinned += 1;
        self.sample_values.truncate(max_samples);
        true
    }
}

/// Scored metrics and labels built for one user query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelevanceContext {
    pub relevant_metrics: BTreeMap<String, BTreeMap<String, LabelContext>>,
    pub relevant_labels: BTreeMap<String, LabelContext>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metric_scores: BTreeMap<String, f64>,
}

impl RelevanceContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.relevant_metrics.is_empty() && self.relevant_labels.is_empty()
    }

    pub fn metric_label(&self, metric: &str, label: &str) -> Option<&LabelContext> {
        self.relevant_metrics.get(metric)?.get(label)
    }
}

/// Prior `{label: value}` assignments keyed by metric name.
pub type HistoryContext = BTreeMap<String, BTreeMap<String, String>>;

/// A single series returned by a label-combination query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Series {
    pub labels: BTreeMap<String, String>,
}

impl Series {
    pub fn new(labels: BTreeMap<String, String>) -> Self {
        Self { labels }
    }

    /// The `__name__` label, if present.
    pub fn metric_name(&self) -> Option<&str> {
        self.labels.get(crate::METRIC_NAME_LABEL).map(String::as_str)
    }
}

/// Candidate query produced by the query-generation collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedQuery {
    pub query: String,
    pub score: f64,
}

/// Input handed to the query-generation collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct QueryGenerationRequest {
    pub user_query: String,
    pub relevant_metrics: BTreeMap<String, BTreeMap<String, LabelContext>>,
    pub relevant_labels: BTreeMap<String, LabelContext>,
    pub history: HistoryContext,
}
