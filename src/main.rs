//! uiknow CLI - Entry point
//!
//! Usage: uiknow <command> [options]

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use uiknow::cli::{Cli, Commands};
use uiknow::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing (stderr: stdout carries command output)
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Configuration (including env overrides) is read once here
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve(args) => uiknow::cli::serve::run(args, config, cli.verbose).await,
        Commands::Show(args) => uiknow::cli::show::run(args, config, cli.verbose).await,
        Commands::Preload(args) => uiknow::cli::preload::run(args, config, cli.verbose).await,
        Commands::Stats(args) => uiknow::cli::stats::execute(args, config).await,
    }
}
