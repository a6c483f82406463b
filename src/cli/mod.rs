//! CLI module - Command definitions and handlers
//!
//! Every command builds one [`Runtime`](crate::runtime::Runtime) and talks to
//! the knowledge base only through it.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod preload;
pub mod serve;
pub mod show;
pub mod stats;
pub mod utils;

/// uiknow - UI framework knowledge base
///
/// Serves API, pattern and migration knowledge from bundled artifacts
/// through a shared cache with built-in telemetry.
#[derive(Parser, Debug)]
#[command(name = "uiknow")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Print the final metrics snapshot to stderr on exit
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file path
    #[arg(short, long, global = true, env = "UIKNOW_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Preload, then answer one request per stdin line until EOF or Ctrl+C
    Serve(serve::ServeArgs),

    /// Show an artifact (or part of it) by key
    Show(show::ShowArgs),

    /// Warm the cache and report per-key outcome
    Preload(preload::PreloadArgs),

    /// Preload, then print the metrics snapshot
    Stats(stats::StatsArgs),
}
