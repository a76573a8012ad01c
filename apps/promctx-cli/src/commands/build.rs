//! Build command

use anyhow::{Context, Result};
use serde_json::json;

use crate::app::{shutdown_token, App};
use crate::output::{self, OutputFormat};

pub async fn run(app: &App, format: OutputFormat) -> Result<()> {
    let cancel = shutdown_token();
    let report = app
        .builder
        .build(&cancel)
        .await
        .context("Knowledge base build failed")?;

    match format {
        OutputFormat::Json => output::print_json(&json!({
            "new_metrics": report.new_metrics,
            "new_labels": report.new_labels,
            "new_catalog_metrics": report.new_catalog_metrics,
            "metric_batches": report.metric_batches,
            "label_batches": report.label_batches,
            "catalog_batches": report.catalog_batches,
            "elapsed_ms": report.elapsed.as_millis() as u64,
            "status": app.builder.status(),
        }))?,
        OutputFormat::Text => {
            output::success(&format!(
                "Knowledge base updated in {:.1}s",
                report.elapsed.as_secs_f64()
            ));
            output::field("New metrics", report.new_metrics);
            output::field("New labels", report.new_labels);
            output::field("New catalog metrics", report.new_catalog_metrics);
            output::field(
                "Batches",
                format!(
                    "{} metric, {} label, {} catalog",
                    report.metric_batches, report.label_batches, report.catalog_batches
                ),
            );
            output::field("Saved to", app.config.storage.data_dir.display());
        }
    }
    Ok(())
}
