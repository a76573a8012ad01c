//! Ask command

use anyhow::{Context, Result};

use crate::app::{shutdown_token, App};
use crate::output::{self, OutputFormat};

pub async fn run(app: &App, query: &str, format: OutputFormat) -> Result<()> {
    app.ensure_loaded().await?;
    let cancel = shutdown_token();
    let queries = app
        .pipeline
        .answer(query, &cancel)
        .await
        .context("Failed to generate queries")?;

    match format {
        OutputFormat::Json => output::print_json(&queries)?,
        OutputFormat::Text if queries.is_empty() => {
            output::warning("No queries generated; nothing relevant was found")
        }
        OutputFormat::Text => {
            for (rank, candidate) in queries.iter().enumerate() {
                println!("{:>2}. [{:.2}] {}", rank + 1, candidate.score, candidate.query);
            }
        }
    }
    Ok(())
}
