//! Wiring of configuration, collaborators and engines

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use promctx_adapters::{ChatCompletionsClient, PrometheusClient, PromptSet};
use promctx_core::AppConfig;
use promctx_index::IndexBuilder;
use promctx_infra::{CallGuard, CancellationToken, JsonFileStore};
use promctx_nlp::{QueryPipeline, RelevanceResolver};

use crate::cli::Args;

pub struct App {
    pub config: AppConfig,
    pub prometheus: Arc<PrometheusClient>,
    pub builder: IndexBuilder,
    pub pipeline: QueryPipeline,
}

impl App {
    pub fn build(args: &Args) -> Result<Self> {
        let config = load_config(args)?;
        config.validate().context("Invalid configuration")?;

        let prometheus = Arc::new(
            PrometheusClient::new(&config.prometheus).context("Failed to create Prometheus client")?,
        );
        let prompts = PromptSet::load(&config.prompts).context("Failed to load prompt templates")?;
        let llm = Arc::new(
            ChatCompletionsClient::new(&config.llm, prompts).context("Failed to create LLM client")?,
        );
        if config.llm.api_key.is_empty() {
            warn!("No LLM API key configured; requests are sent without authorization");
        }

        let store = Arc::new(JsonFileStore::new(&config.storage.data_dir));
        let builder = IndexBuilder::new(
            prometheus.clone(),
            llm.clone(),
            store,
            config.index.clone(),
        );

        let pipeline = QueryPipeline::new(
            llm.clone(),
            llm,
            builder.snapshot(),
            RelevanceResolver::new(config.resolver.clone()),
        )
        .with_call_guard(CallGuard::new(config.llm.timeout()));

        info!(
            prometheus = %config.prometheus.url,
            data_dir = %config.storage.data_dir.display(),
            "Application initialized"
        );

        Ok(Self {
            config,
            prometheus,
            builder,
            pipeline,
        })
    }

    /// Makes sure a knowledge base is published, loading the persisted one.
    pub async fn ensure_loaded(&self) -> Result<()> {
        if !self.builder.snapshot().is_published() {
            self.builder
                .load()
                .await
                .context("Failed to load the knowledge base")?;
        }
        Ok(())
    }
}

fn load_config(args: &Args) -> Result<AppConfig> {
    match &args.config {
        Some(path) => {
            let path_str = path.to_str().context("Config path is not valid UTF-8")?;
            AppConfig::load_from_file(path_str)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))
        }
        None => AppConfig::load().context("Failed to load configuration from environment"),
    }
}

/// Token cancelled on Ctrl-C.
pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            trigger.cancel();
        }
    });
    token
}
