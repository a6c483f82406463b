//! uiknow - UI framework knowledge base
//!
//! Answers questions about a UI framework's APIs, patterns and migration
//! guidance from bundled structured artifacts.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │ KnowledgeOps (lookup, entries, list_keys)  │
//! ├────────────────────────────────────────────┤
//! │ ResourceCache        TelemetryAggregator   │
//! │ (singleflight)       (events, counters)    │
//! ├────────────────────────────────────────────┤
//! │ ArtifactStore (bundled / directory)        │
//! └────────────────────────────────────────────┘
//! ```
//!
//! ## Key Concepts
//!
//! - **Singleflight**: concurrent misses on one key share a single load
//! - **Preload**: common keys are warmed at startup; failures degrade to lazy loading
//! - **Scoped activity**: timed span that always records, even on error or drop
//! - **Snapshot**: immutable copy of all metrics for reporting and shutdown

pub mod cli;
pub mod config;
pub mod core;
pub mod ops;
pub mod runtime;
pub mod telemetry;

pub use core::artifact::{Artifact, ArtifactStore, BundledStore, DirectoryStore};
pub use core::cache::{CacheConfig, PreloadReport, ResourceCache};
pub use core::error::{KbError, KbResult};
pub use ops::KnowledgeOps;
pub use runtime::Runtime;
pub use telemetry::{MetricsSnapshot, TelemetryAggregator};
