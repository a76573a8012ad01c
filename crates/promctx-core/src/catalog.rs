//! Ground-truth catalogs discovered from the monitoring store, the query
//! history table, and the knowledge base that bundles them.

use crate::error::{CoreError, Result};
use crate::index::SynonymIndex;
use crate::types::{HistoryContext, NameSet, Series};
use crate::METRIC_NAME_LABEL;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which labels and values actually occur on each metric.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricLabelCatalog(BTreeMap<String, BTreeMap<String, NameSet>>);

impl MetricLabelCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_metric(&self, metric: &str) -> bool {
        self.0.contains_key(metric)
    }

    pub fn labels_for(&self, metric: &str) -> Option<&BTreeMap<String, NameSet>> {
        self.0.get(metric)
    }

    pub fn values_for(&self, metric: &str, label: &str) -> Option<&NameSet> {
        self.0.get(metric)?.get(label)
    }

    /// Metrics from `names` without a catalog entry, sorted.
    pub fn missing<I, S>(&self, names: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let missing: NameSet = names
            .into_iter()
            .map(|n| n.as_ref().to_string())
            .filter(|n| !n.is_empty() && !self.0.contains_key(n))
            .collect();
        missing.to_sorted_vec()
    }

    /// Records every label/value pair of a series under its metric.
    ///
    /// Returns the metric name, or `None` when the series has no `__name__`.
    pub fn record_series<'a>(&mut self, series: &'a Series) -> Option<&'a str> {
        let metric = series.metric_name()?;
        let labels = self.0.entry(metric.to_string()).or_default();
        for (label, value) in &series.labels {
            if label != METRIC_NAME_LABEL {
                labels.entry(label.clone()).or_default().add(value.clone());
            }
        }
        Some(metric)
    }

    pub fn metric_count(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Values of each label across all metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelValueCatalog(BTreeMap<String, NameSet>);

impl LabelValueCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn values_for(&self, label: &str) -> Option<&NameSet> {
        self.0.get(label)
    }

    pub fn record(&mut self, label: impl Into<String>, value: impl Into<String>) {
        self.0.entry(label.into()).or_default().add(value);
    }

    pub fn record_series(&mut self, series: &Series) {
        for (label, value) in &series.labels {
            if label != METRIC_NAME_LABEL {
                self.record(label.clone(), value.clone());
            }
        }
    }

    /// Labels having `value` among their values, in label order, paired with
    /// the catalog's spelling of the value.
    pub fn labels_containing<'a>(&'a self, value: &str) -> Vec<(&'a str, &'a str)> {
        self.0
            .iter()
            .filter_map(|(label, values)| {
                values
                    .find_ignore_case(value)
                    .map(|actual| (label.as_str(), actual))
            })
            .collect()
    }

    pub fn label_count(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One decoded row of the history table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub metric_token: String,
    pub label_token: String,
    pub assignments: HistoryContext,
}

/// Prior resolutions keyed by `(metricToken, labelToken)`.
///
/// Rows are stored in their persisted, JSON-encoded form: the key is a
/// two-element array and the value an object of `{metric: {label: value}}`.
/// They are decoded on read so that a corrupt row is reported to whoever
/// consumes it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryTable(BTreeMap<String, String>);

impl HistoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an already encoded row.
    pub fn insert_raw(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Encodes and stores an assignment for a token pair.
    pub fn record(
        &mut self,
        metric_token: &str,
        label_token: &str,
        assignments: &HistoryContext,
    ) -> Result<()> {
        let key = serde_json::to_string(&[metric_token, label_token])?;
        let value = serde_json::to_string(assignments)?;
        self.0.insert(key, value);
        Ok(())
    }

    /// Decodes every row in key order.
    ///
    /// Keys that decode to something other than a pair are skipped; keys or
    /// values that are not valid JSON of the expected shape are errors.
    pub fn entries(&self) -> Result<Vec<HistoryEntry>> {
        let mut decoded = Vec::with_capacity(self.0.len());
        for (key, value) in &self.0 {
            let parts: Vec<String> = serde_json::from_str(key).map_err(|e| {
                CoreError::serialization(format!("invalid history key {key:?}: {e}"))
            })?;
            let [metric_token, label_token]: [String; 2] = match parts.try_into() {
                Ok(pair) => pair,
                Err(_) => continue,
            };
            let assignments: HistoryContext = serde_json::from_str(value).map_err(|e| {
                CoreError::serialization(format!("invalid history value for {key}: {e}"))
            })?;
            decoded.push(HistoryEntry {
                metric_token,
                label_token,
                assignments,
            });
        }
        Ok(decoded)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Everything the resolver needs, as one immutable snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub metric_index: SynonymIndex,
    pub label_index: SynonymIndex,
    pub metric_labels: MetricLabelCatalog,
    pub label_values: LabelValueCatalog,
    pub history: HistoryTable,
}

impl KnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }
}
