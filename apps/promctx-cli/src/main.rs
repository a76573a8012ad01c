//! promctx command-line driver

mod app;
mod cli;
mod commands;
mod output;
mod telemetry;

use anyhow::Result;
use clap::Parser;
use tracing::{debug, error};

use crate::app::App;
use crate::cli::{Args, Command};
use crate::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let args = Args::parse();
    init_telemetry(&args)?;

    debug!("promctx {}", env!("CARGO_PKG_VERSION"));

    let result = run(args).await;
    if let Err(ref e) = result {
        error!("Command failed: {:#}", e);
    }
    result
}

async fn run(args: Args) -> Result<()> {
    let app = App::build(&args)?;
    let format = args.format;

    match args.command {
        Command::Build => commands::build::run(&app, format).await,
        Command::Status => commands::status::run(&app, format).await,
        Command::Resolve { query } => commands::resolve::run(&app, &query, format).await,
        Command::Ask { query } => commands::ask::run(&app, &query, format).await,
    }
}
