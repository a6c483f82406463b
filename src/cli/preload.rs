//! `uiknow preload` command
//!
//! Warms the cache and reports which keys loaded.
//!
//! # Usage
//! ```bash
//! uiknow preload                 # configured common keys
//! uiknow preload controls bogus --json
//! ```

use anyhow::Result;
use clap::Args;

use super::utils;
use crate::config::Config;
use crate::runtime::Runtime;

#[derive(Args, Debug)]
pub struct PreloadArgs {
    /// Keys to preload (default: cache.common_keys from config)
    pub keys: Vec<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: PreloadArgs, mut config: Config, verbose: bool) -> Result<()> {
    if !args.keys.is_empty() {
        config.cache.common_keys = args.keys;
    }

    // Partial failure is still a successful preload
    let (runtime, report) = Runtime::start(config).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&utils::report_json(&report))?);
    } else {
        utils::print_report(&report);
    }

    let snapshot = runtime.shutdown("preload");
    if verbose {
        utils::eprint_snapshot(&snapshot);
    }
    Ok(())
}
