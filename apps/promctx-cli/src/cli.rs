//! Command-line argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::output::OutputFormat;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "promctx",
    about = "Maps natural-language questions onto Prometheus metrics and labels",
    version,
    long_about = "Builds a synonym-indexed catalog of a Prometheus server's metrics, \
                  labels and label values, and resolves questions against it."
)]
pub struct Args {
    /// Path to a configuration file; environment variables (PROMCTX__*) override it
    #[arg(short, long, env = "PROMCTX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        short,
        long,
        env = "LOG_LEVEL",
        default_value = "info",
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "JSON_LOGS")]
    pub json_logs: bool,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Fetch the catalog, generate synonyms for new names and persist the knowledge base
    Build,

    /// Show what the persisted knowledge base contains and whether Prometheus is reachable
    Status,

    /// Resolve a question into scored metrics and labels without generating queries
    Resolve {
        /// The question, in plain language
        query: String,
    },

    /// Resolve a question and generate ranked PromQL candidates
    Ask {
        /// The question, in plain language
        query: String,
    },
}
