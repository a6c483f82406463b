//! Telemetry - Events, counters and durations for the process lifetime
//!
//! # Invariants
//! - Recording never fails and never blocks beyond one short critical section.
//! - Events are immutable once recorded; the log only drops its oldest entry
//!   when full.
//! - A [`MetricsSnapshot`] shares nothing with the live aggregator.

pub mod activity;
pub mod aggregator;
pub mod event;
pub mod metrics;

pub use activity::{Activity, ActivityState};
pub use aggregator::{TelemetryAggregator, TelemetryConfig};
pub use event::{attrs, AttrValue, Attributes, TelemetryEvent, TelemetryLevel};
pub use metrics::{DurationStat, MetricsSnapshot};
