//! Resolve command

use anyhow::{Context, Result};
use colored::Colorize;

use crate::app::{shutdown_token, App};
use crate::output::{self, OutputFormat};

pub async fn run(app: &App, query: &str, format: OutputFormat) -> Result<()> {
    app.ensure_loaded().await?;
    let cancel = shutdown_token();
    let context = app
        .pipeline
        .process(query, &cancel)
        .await
        .context("Failed to resolve question")?;

    if format == OutputFormat::Json {
        return output::print_json(&context);
    }

    for warning in &context.warnings {
        output::warning(&warning.to_string());
    }

    let relevance = &context.relevance;
    if relevance.relevant_metrics.is_empty() && relevance.relevant_labels.is_empty() {
        output::warning("Nothing in the knowledge base matched");
        return Ok(());
    }

    if !relevance.relevant_metrics.is_empty() {
        println!("{}", "Metrics:".bold());
        for (metric, labels) in &relevance.relevant_metrics {
            let score = relevance.metric_scores.get(metric).copied().unwrap_or(1.0);
            println!("  {} ({:.1})", metric.cyan(), score);
            for (label, ctx) in labels {
                println!(
                    "    {} ({:.1}) {}",
                    label,
                    ctx.match_score,
                    ctx.sample_values.join(", ").dimmed()
                );
            }
        }
    }

    if !relevance.relevant_labels.is_empty() {
        println!("{}", "Labels:".bold());
        for (label, ctx) in &relevance.relevant_labels {
            println!(
                "  {} ({:.1}) {}",
                label.cyan(),
                ctx.match_score,
                ctx.sample_values.join(", ").dimmed()
            );
        }
    }

    if !context.history.is_empty() {
        println!("{}", "History:".bold());
        for (metric, assignments) in &context.history {
            let pairs: Vec<String> = assignments.iter().map(|(l, v)| format!("{l}={v}")).collect();
            println!("  {} {}", metric, pairs.join(", "));
        }
    }
    Ok(())
}
