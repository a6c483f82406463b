//! `uiknow stats` command - Preload and print metrics

use anyhow::Result;
use clap::Args;

use super::utils;
use crate::config::Config;
use crate::runtime::Runtime;

/// Stats command arguments
#[derive(Args, Debug)]
pub struct StatsArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Execute stats command
pub async fn execute(args: StatsArgs, config: Config) -> Result<()> {
    let (runtime, _report) = Runtime::start(config).await;
    let snapshot = runtime.shutdown("stats");

    if args.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        utils::print_snapshot(&snapshot);
        println!("\n📁 Store: {}", runtime.cache().store().name());
    }

    Ok(())
}
