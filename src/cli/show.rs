//! `uiknow show` command
//!
//! Shows an artifact, or the value at a JSON pointer inside it.
//!
//! # Usage
//! ```bash
//! uiknow show controls
//! uiknow show controls --pointer /entries/Button
//! uiknow show migration --format json
//! ```

use anyhow::Result;
use clap::{Args, ValueEnum};
use serde_json::Value;

use crate::config::Config;
use crate::runtime::Runtime;

#[derive(ValueEnum, Clone, Debug, Default)]
pub enum OutputFormat {
    /// Entry names only (whole artifact) or the pretty value (pointer)
    #[default]
    Pretty,
    /// Raw JSON
    Json,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Artifact key (e.g. controls, patterns, migration)
    pub key: String,

    /// JSON pointer inside the artifact (e.g. /entries/Button)
    #[arg(short, long)]
    pub pointer: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "pretty")]
    pub format: OutputFormat,
}

pub async fn run(args: ShowArgs, config: Config, verbose: bool) -> Result<()> {
    let runtime = Runtime::build(config);
    let ops = runtime.ops();

    let result = ops.lookup(&args.key, args.pointer.as_deref()).await;
    let snapshot = runtime.shutdown("show");
    if verbose {
        super::utils::eprint_snapshot(&snapshot);
    }

    let value = result?;
    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&value)?),
        OutputFormat::Pretty => print_pretty(&args.key, args.pointer.as_deref(), &value)?,
    }

    Ok(())
}

fn print_pretty(key: &str, pointer: Option<&str>, value: &Value) -> Result<()> {
    match (pointer, value) {
        (_, Value::String(s)) => println!("{}", s),
        (None, _) => {
            println!("📄 {}", key);
            match &value["entries"] {
                Value::Object(map) => {
                    for (name, entry) in map {
                        let summary = entry
                            .get("summary")
                            .or_else(|| entry.get("title"))
                            .and_then(Value::as_str)
                            .unwrap_or("");
                        println!("  ├── {:<24} {}", name, summary);
                    }
                }
                Value::Array(items) => {
                    for item in items {
                        let line = item
                            .get("change")
                            .or_else(|| item.get("summary"))
                            .and_then(Value::as_str)
                            .unwrap_or("");
                        println!("  ├── {}", line);
                    }
                }
                _ => {}
            }
        }
        (Some(_), _) => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}
