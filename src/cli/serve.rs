//! `uiknow serve` command
//!
//! Preloads the common keys, announces readiness on stderr, then answers one
//! request per stdin line. Requests run concurrently; each response is one
//! JSON line on stdout tagged with the request's line number.
//!
//! # Requests
//! ```text
//! controls                  # whole artifact
//! controls /entries/Button  # value at a JSON pointer
//! :entries patterns         # entry names
//! :keys                     # known keys and cache state
//! :metrics                  # metrics snapshot
//! ```
//!
//! On EOF or Ctrl+C, in-flight requests are drained, then the shutdown
//! event with the final metrics snapshot is recorded.
//!
//! Stdin is read on a plain thread feeding a channel. A blocked read there
//! does not hold up runtime shutdown after Ctrl+C.

use std::io::{BufRead, Write};

use anyhow::Result;
use clap::Args;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::config::Config;
use crate::core::error::KbError;
use crate::ops::KnowledgeOps;
use crate::runtime::Runtime;

/// Start the request loop
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Skip the startup preload (everything loads on demand)
    #[arg(long)]
    pub no_preload: bool,
}

pub async fn run(args: ServeArgs, config: Config, verbose: bool) -> Result<()> {
    let runtime = Runtime::build(config);
    if !args.no_preload {
        let report = runtime.warm().await;
        eprintln!(
            "📦 Preload {}: {} loaded, {} failed",
            report.outcome(),
            report.loaded.len(),
            report.failed.len()
        );
    }
    eprintln!("🚀 uiknow ready (store: {})", runtime.cache().store().name());

    let ops = runtime.ops();
    let mut lines = spawn_stdin_reader();
    let mut in_flight: JoinSet<String> = JoinSet::new();
    let mut line_no: u64 = 0;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let reason = loop {
        tokio::select! {
            line = lines.recv() => match line {
                Some(Ok(line)) => {
                    line_no += 1;
                    if line.trim().is_empty() {
                        continue;
                    }
                    let ops = ops.clone();
                    let id = line_no;
                    in_flight.spawn(async move { handle_request(&ops, id, &line).await.to_string() });
                }
                None => break "eof",
                Some(Err(e)) => {
                    tracing::warn!("stdin read failed: {}", e);
                    break "input_error";
                }
            },
            Some(done) = in_flight.join_next(), if !in_flight.is_empty() => {
                emit(done);
            }
            _ = &mut ctrl_c => break "signal",
        }
    };

    while let Some(done) = in_flight.join_next().await {
        emit(done);
    }

    let snapshot = runtime.shutdown(reason);
    eprintln!("👋 Shutting down ({})", reason);
    if verbose {
        super::utils::eprint_snapshot(&snapshot);
    }
    std::io::stdout().flush()?;

    Ok(())
}

/// Forward stdin lines until EOF, a read error, or the receiver closing
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<std::io::Result<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let failed = line.is_err();
            if tx.send(line).is_err() || failed {
                break;
            }
        }
    });
    rx
}

fn emit(done: Result<String, tokio::task::JoinError>) {
    match done {
        Ok(response) => println!("{}", response),
        Err(e) => tracing::warn!("request task failed: {}", e),
    }
}

/// Handle one request line
pub async fn handle_request(ops: &KnowledgeOps, id: u64, line: &str) -> Value {
    let mut parts = line.split_whitespace();
    let head = parts.next().unwrap_or_default();

    let result = match head {
        ":keys" => Ok(ops.list_keys()),
        ":metrics" => serde_json::to_value(ops.metrics()).map_err(anyhow::Error::from),
        ":entries" => match parts.next() {
            Some(key) => ops.entries(key).await.map(|names| json!(names)),
            None => Err(anyhow::anyhow!("Usage: :entries <key>")),
        },
        key => ops.lookup(key, parts.next()).await,
    };

    match result {
        Ok(value) => json!({ "id": id, "ok": true, "result": value }),
        Err(e) => {
            let kind = e
                .downcast_ref::<KbError>()
                .map(KbError::kind)
                .unwrap_or("request");
            json!({ "id": id, "ok": false, "kind": kind, "error": e.to_string() })
        }
    }
}
