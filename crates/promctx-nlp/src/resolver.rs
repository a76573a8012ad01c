//! Relevance resolution
//!
//! Turns candidate tokens into a scored [`RelevanceContext`] by resolving
//! them through the synonym indexes and checking every hit against the label
//! catalogs. Scoring:
//!
//! | signal                                   | effect                                 |
//! |------------------------------------------|----------------------------------------|
//! | metric resolved first time               | metric score 1.0                       |
//! | metric resolved again                    | + `metric_repeat_weight`               |
//! | label valid for metric / standalone, new | score 1.0, sorted sample values        |
//! | same label again                         | + `label_repeat_weight`                |
//! | value matches a label already recorded   | + `value_match_weight`, value pinned   |
//! | value matches a label not yet recorded   | score 1.0 with only that value         |

use crate::candidates::CandidateTokens;
use crate::error::{ResolveError, Result};
use crate::history::collect_history;
use promctx_core::{
    HistoryContext, HistoryTable, KnowledgeBase, LabelContext, LabelValueCatalog,
    MetricLabelCatalog, NameSet, RelevanceContext, ResolverConfig, SynonymIndex,
};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// Output of one resolution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    pub context: RelevanceContext,
    pub history: HistoryContext,
}

#[derive(Debug, Clone, Default)]
pub struct RelevanceResolver {
    config: ResolverConfig,
}

impl RelevanceResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolves against one knowledge base snapshot.
    pub fn resolve(&self, candidates: &CandidateTokens, knowledge: &KnowledgeBase) -> Result<Resolution> {
        self.resolve_with(
            candidates,
            &knowledge.metric_index,
            &knowledge.label_index,
            &knowledge.metric_labels,
            &knowledge.label_values,
            &knowledge.history,
        )
    }

    #[instrument(
        skip_all,
        fields(
            metric_tokens = candidates.metric_tokens.len(),
            label_tokens = candidates.label_tokens.len(),
            value_tokens = candidates.value_tokens.len()
        )
    )]
    pub fn resolve_with(
        &self,
        candidates: &CandidateTokens,
        metric_index: &SynonymIndex,
        label_index: &SynonymIndex,
        metric_labels: &MetricLabelCatalog,
        label_values: &LabelValueCatalog,
        history: &HistoryTable,
    ) -> Result<Resolution> {
        let mut context = RelevanceContext::new();

        self.resolve_metrics(&mut context, candidates, metric_index);

        let label_names = resolve_all(label_index, &candidates.label_tokens);
        let metrics: Vec<String> = context.relevant_metrics.keys().cloned().collect();
        for metric in &metrics {
            let Some(catalog) = metric_labels.labels_for(metric) else {
                debug!(metric = %metric, "Metric has no catalog entry");
                continue;
            };
            let labels = context.relevant_metrics.entry(metric.clone()).or_default();
            self.score_labels(labels, &label_names, |label| catalog.get(label));
            for value in &candidates.value_tokens {
                let matches = catalog
                    .iter()
                    .filter_map(|(label, values)| {
                        values.find_ignore_case(value).map(|actual| (label.as_str(), actual))
                    })
                    .collect::<Vec<_>>();
                self.score_values(labels, matches);
            }
        }

        self.score_labels(&mut context.relevant_labels, &label_names, |label| {
            label_values.values_for(label)
        });
        for value in &candidates.value_tokens {
            let matches = label_values.labels_containing(value);
            if matches.is_empty() {
                debug!(value = %value, "Value not found in any label");
            }
            self.score_values(&mut context.relevant_labels, matches);
        }

        let history = collect_history(history, &candidates.metric_tokens, &candidates.label_tokens)
            .map_err(|e| ResolveError::serialization(e.to_string()))?;

        debug!(
            metrics = context.relevant_metrics.len(),
            labels = context.relevant_labels.len(),
            history_metrics = history.len(),
            "Resolution finished"
        );
        Ok(Resolution { context, history })
    }

    fn resolve_metrics(
        &self,
        context: &mut RelevanceContext,
        candidates: &CandidateTokens,
        metric_index: &SynonymIndex,
    ) {
        for token in &candidates.metric_tokens {
            let names = metric_index.lookup(token);
            if names.is_empty() {
                debug!(token = %token, "Metric token did not resolve");
                continue;
            }
            for name in &names {
                match context.metric_scores.entry(name.clone()) {
                    Entry::Occupied(mut score) => {
                        *score.get_mut() += self.config.metric_repeat_weight;
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(1.0);
                        context.relevant_metrics.insert(name.clone(), BTreeMap::new());
                    }
                }
            }
        }
    }

    /// Records each resolved label for which `values_of` knows the label.
    fn score_labels<'a>(
        &self,
        labels: &mut BTreeMap<String, LabelContext>,
        label_names: &[String],
        values_of: impl Fn(&str) -> Option<&'a NameSet>,
    ) {
        for label in label_names {
            let Some(values) = values_of(label) else {
                continue;
            };
            match labels.entry(label.clone()) {
                Entry::Occupied(mut existing) => {
                    existing.get_mut().bump(self.config.label_repeat_weight);
                }
                Entry::Vacant(slot) => {
                    slot.insert(LabelContext::sampled(values, self.config.max_sample_values));
                }
            }
        }
    }

    fn score_values(&self, labels: &mut BTreeMap<String, LabelContext>, matches: Vec<(&str, &str)>) {
        for (label, actual) in matches {
            match labels.entry(label.to_string()) {
                Entry::Occupied(mut existing) => {
                    let entry = existing.get_mut();
                    entry.bump(self.config.value_match_weight);
                    entry.pin_value(actual, self.config.max_sample_values);
                }
                Entry::Vacant(slot) => {
                    slot.insert(LabelContext::matched(actual));
                }
            }
        }
    }
}

/// Every canonical name reached by `tokens`, once per token hit.
fn resolve_all(index: &SynonymIndex, tokens: &[String]) -> Vec<String> {
    let mut names = Vec::new();
    for token in tokens {
        let hits = index.lookup(token);
        if hits.is_empty() {
            debug!(token = %token, "Label token did not resolve");
        }
        names.extend(hits.iter().cloned());
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use promctx_core::Series;

    fn knowledge() -> KnowledgeBase {
        let mut kb = KnowledgeBase::new();
        kb.metric_index.merge("node_cpu_seconds_total", ["cpu"]);
        kb.label_index.merge("mode", ["state"]);
        kb.label_index.merge("cpu", Vec::<String>::new());

        for mode in ["idle", "user", "system", "iowait", "nice", "steal"] {
            let s = Series::new(
                [
                    ("__name__", "node_cpu_seconds_total"),
                    ("mode", mode),
                    ("cpu", "0"),
                ]
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            );
            kb.metric_labels.record_series(&s);
            kb.label_values.record_series(&s);
        }
        kb
    }

    fn tokens(metrics: &[&str], labels: &[&str], values: &[&str]) -> CandidateTokens {
        CandidateTokens::new(metrics, labels, values)
    }

    #[test]
    fn test_label_samples_are_sorted_and_capped() {
        let resolution = RelevanceResolver::default()
            .resolve(&tokens(&["cpu"], &["mode"], &[]), &knowledge())
            .unwrap();

        let mode = resolution
            .context
            .metric_label("node_cpu_seconds_total", "mode")
            .unwrap();
        assert_eq!(mode.match_score, 1.0);
        assert_eq!(
            mode.sample_values,
            vec!["idle", "iowait", "nice", "steal", "system"]
        );
        assert_eq!(resolution.context.metric_scores["node_cpu_seconds_total"], 1.0);
    }

    #[test]
    fn test_repeat_mentions_bump_scores() {
        let resolution = RelevanceResolver::default()
            .resolve(&tokens(&["cpu", "CPU"], &["mode", "state"], &[]), &knowledge())
            .unwrap();

        assert_eq!(resolution.context.metric_scores["node_cpu_seconds_total"], 1.5);
        let mode = resolution
            .context
            .metric_label("node_cpu_seconds_total", "mode")
            .unwrap();
        assert_eq!(mode.match_score, 1.5);
        assert_eq!(resolution.context.relevant_labels["mode"].match_score, 1.5);
    }

    #[test]
    fn test_value_match_pins_value() {
        let resolution = RelevanceResolver::default()
            .resolve(&tokens(&["cpu"], &["mode"], &["User"]), &knowledge())
            .unwrap();

        let mode = resolution
            .context
            .metric_label("node_cpu_seconds_total", "mode")
            .unwrap();
        assert!((mode.match_score - 1.2).abs() < 1e-9);
        assert_eq!(
            mode.sample_values,
            vec!["user", "idle", "iowait", "nice", "steal"]
        );

        let standalone = &resolution.context.relevant_labels["mode"];
        assert_eq!(standalone.sample_values[0], "user");
    }

    #[test]
    fn test_value_only_match_creates_label() {
        let resolution = RelevanceResolver::default()
            .resolve(&tokens(&["cpu"], &[], &["steal"]), &knowledge())
            .unwrap();

        let mode = resolution
            .context
            .metric_label("node_cpu_seconds_total", "mode")
            .unwrap();
        assert_eq!(mode.match_score, 1.0);
        assert_eq!(mode.sample_values, vec!["steal"]);
        assert_eq!(resolution.context.relevant_labels["mode"].sample_values, vec!["steal"]);
    }

    #[test]
    fn test_label_not_valid_for_metric_is_skipped() {
        let mut kb = knowledge();
        kb.label_index.merge("env", ["environment"]);
        kb.label_values.record("env", "prod");

        let resolution = RelevanceResolver::default()
            .resolve(&tokens(&["cpu"], &["environment"], &[]), &kb)
            .unwrap();

        assert!(resolution.context.relevant_metrics["node_cpu_seconds_total"].is_empty());
        assert_eq!(resolution.context.relevant_labels["env"].sample_values, vec!["prod"]);
    }

    #[test]
    fn test_unresolved_tokens_are_dropped() {
        let resolution = RelevanceResolver::default()
            .resolve(&tokens(&["disk"], &["device"], &["sda"]), &knowledge())
            .unwrap();
        assert!(resolution.context.is_empty());
        assert!(resolution.history.is_empty());
    }

    #[test]
    fn test_empty_candidates() {
        let resolution = RelevanceResolver::default()
            .resolve(&CandidateTokens::default(), &knowledge())
            .unwrap();
        assert_eq!(resolution, Resolution::default());
    }
}
