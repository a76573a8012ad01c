//! History enrichment
//!
//! Prior `{label: value}` assignments recorded for a `(metric token, label
//! token)` pair are handed to query generation as-is. They never affect
//! match scores.

use promctx_core::{normalize_token, HistoryContext, HistoryTable, Result};
use std::collections::BTreeSet;
use tracing::debug;

/// Merges every history row whose token pair occurs in the candidates.
///
/// Rows are visited in key order; on a label collision the later row wins.
/// Nothing is decoded when either token list is empty.
pub fn collect_history(
    table: &HistoryTable,
    metric_tokens: &[String],
    label_tokens: &[String],
) -> Result<HistoryContext> {
    let mut context = HistoryContext::new();
    if metric_tokens.is_empty() || label_tokens.is_empty() || table.is_empty() {
        return Ok(context);
    }

    let metrics: BTreeSet<String> = metric_tokens.iter().filter_map(|t| normalize_token(t)).collect();
    let labels: BTreeSet<String> = label_tokens.iter().filter_map(|t| normalize_token(t)).collect();

    for entry in table.entries()? {
        let hit = normalize_token(&entry.metric_token).map_or(false, |m| metrics.contains(&m))
            && normalize_token(&entry.label_token).map_or(false, |l| labels.contains(&l));
        if !hit {
            continue;
        }
        debug!(
            metric_token = %entry.metric_token,
            label_token = %entry.label_token,
            "History row matched"
        );
        for (metric, assignments) in entry.assignments {
            context.entry(metric).or_default().extend(assignments);
        }
    }

    Ok(context)
}
