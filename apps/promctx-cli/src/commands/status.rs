//! Status command

use anyhow::Result;
use serde_json::json;

use crate::app::App;
use crate::output::{self, OutputFormat};

pub async fn run(app: &App, format: OutputFormat) -> Result<()> {
    app.ensure_loaded().await?;
    let knowledge = app.builder.snapshot().current();
    let health = app.prometheus.health_check().await;

    match format {
        OutputFormat::Json => output::print_json(&json!({
            "data_dir": app.config.storage.data_dir,
            "metrics": knowledge.metric_index.len(),
            "labels": knowledge.label_index.len(),
            "catalog_metrics": knowledge.metric_labels.metric_count(),
            "catalog_labels": knowledge.label_values.label_count(),
            "history_rows": knowledge.history.len(),
            "prometheus": health,
        }))?,
        OutputFormat::Text => {
            output::field("Data directory", app.config.storage.data_dir.display());
            output::field("Indexed metrics", knowledge.metric_index.len());
            output::field("Indexed labels", knowledge.label_index.len());
            output::field("Metrics with series", knowledge.metric_labels.metric_count());
            output::field("Labels with values", knowledge.label_values.label_count());
            output::field("History rows", knowledge.history.len());
            if health.healthy {
                output::success(&health.message);
            } else {
                output::failure(&format!("Prometheus: {}", health.message));
            }
        }
    }
    Ok(())
}
