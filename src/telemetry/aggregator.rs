//! Process-wide telemetry aggregator
//!
//! Counters and durations live in sharded maps of atomics, so increments on
//! the hot path never take a global lock. The event log is a bounded FIFO
//! behind a single mutex held only for the push.
//!
//! Activity totals share one cell per name. A finish bumps `count` before
//! `errors` and a snapshot reads `errors` before `count`, so a snapshot never
//! shows more errors than finished activities.

use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;

use super::activity::Activity;
use super::event::{Attributes, TelemetryEvent, TelemetryLevel};
use super::metrics::{DurationStat, MetricsSnapshot};

const DEFAULT_MAX_EVENTS: usize = 10_000;
const DEFAULT_SNAPSHOT_EVENTS: usize = 50;

/// Aggregator settings, fixed at construction
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Events below this level are dropped
    pub min_level: TelemetryLevel,
    /// Maximum retained events; the oldest is evicted beyond this
    pub max_events: usize,
    /// Number of most recent events copied into each snapshot
    pub snapshot_events: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            min_level: TelemetryLevel::Info,
            max_events: DEFAULT_MAX_EVENTS,
            snapshot_events: DEFAULT_SNAPSHOT_EVENTS,
        }
    }
}

#[derive(Debug, Default)]
struct DurationCell {
    count: AtomicU64,
    total_us: AtomicU64,
    max_us: AtomicU64,
}

impl DurationCell {
    fn add(&self, micros: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_us.fetch_add(micros, Ordering::Relaxed);
        self.max_us.fetch_max(micros, Ordering::Relaxed);
    }

    fn raw(&self) -> (u64, u64, u64) {
        (
            self.count.load(Ordering::Relaxed),
            self.total_us.load(Ordering::Relaxed),
            self.max_us.load(Ordering::Relaxed),
        )
    }
}

#[derive(Debug, Default)]
struct ActivityCell {
    count: AtomicU64,
    errors: AtomicU64,
    timing: DurationCell,
}

#[derive(Debug, Default)]
struct EventLog {
    buffer: VecDeque<TelemetryEvent>,
    next_seq: u64,
}

/// Thread-safe recorder of events, counters and durations
#[derive(Debug)]
pub struct TelemetryAggregator {
    config: TelemetryConfig,
    started: Instant,
    counters: DashMap<String, AtomicU64>,
    durations: DashMap<String, DurationCell>,
    activities: DashMap<String, ActivityCell>,
    events: Mutex<EventLog>,
    events_recorded: AtomicU64,
    events_evicted: AtomicU64,
    events_filtered: AtomicU64,
}

impl Default for TelemetryAggregator {
    fn default() -> Self {
        Self::new(TelemetryConfig::default())
    }
}

impl TelemetryAggregator {
    pub fn new(config: TelemetryConfig) -> Self {
        let capacity = config.max_events.min(1024);
        Self {
            config,
            started: Instant::now(),
            counters: DashMap::new(),
            durations: DashMap::new(),
            activities: DashMap::new(),
            events: Mutex::new(EventLog {
                buffer: VecDeque::with_capacity(capacity),
                next_seq: 0,
            }),
            events_recorded: AtomicU64::new(0),
            events_evicted: AtomicU64::new(0),
            events_filtered: AtomicU64::new(0),
        }
    }

    pub fn min_level(&self) -> TelemetryLevel {
        self.config.min_level
    }

    /// Record an info-level event
    pub fn record_event(&self, name: &str, attributes: Attributes) {
        self.record_event_at(TelemetryLevel::Info, name, attributes);
    }

    /// Record an event at `level`; dropped when below the minimum level
    pub fn record_event_at(&self, level: TelemetryLevel, name: &str, attributes: Attributes) {
        if level == TelemetryLevel::Off || level < self.config.min_level {
            self.events_filtered.fetch_add(1, Ordering::Relaxed);
            return;
        }

        mirror_to_tracing(level, name, &attributes);

        if self.config.max_events == 0 {
            self.events_evicted.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let mut log = self.lock_events();
        let event = TelemetryEvent {
            seq: log.next_seq,
            name: name.to_string(),
            level,
            timestamp: Utc::now(),
            attributes,
        };
        log.next_seq += 1;

        if log.buffer.len() >= self.config.max_events {
            log.buffer.pop_front();
            self.events_evicted.fetch_add(1, Ordering::Relaxed);
        }
        log.buffer.push_back(event);
        self.events_recorded.fetch_add(1, Ordering::Relaxed);
    }

    /// Atomic add to a named counter
    pub fn increment_counter(&self, name: &str, delta: u64) {
        if let Some(counter) = self.counters.get(name) {
            counter.fetch_add(delta, Ordering::Relaxed);
            return;
        }
        self.counters
            .entry(name.to_string())
            .or_default()
            .fetch_add(delta, Ordering::Relaxed);
    }

    /// Add one sample to a named duration
    pub fn record_duration(&self, name: &str, elapsed: Duration) {
        let micros = as_micros(elapsed);
        if let Some(cell) = self.durations.get(name) {
            cell.add(micros);
            return;
        }
        self.durations.entry(name.to_string()).or_default().add(micros);
    }

    /// Record one finished activity: duration, `<name>.count`, `<name>.errors`
    pub(crate) fn record_activity(&self, name: &str, elapsed: Duration, failed: bool) {
        let apply = |cell: &ActivityCell| {
            cell.timing.add(as_micros(elapsed));
            cell.count.fetch_add(1, Ordering::Release);
            if failed {
                cell.errors.fetch_add(1, Ordering::Release);
            }
        };

        if let Some(cell) = self.activities.get(name) {
            apply(cell.value());
            return;
        }
        let cell = self.activities.entry(name.to_string()).or_default();
        apply(cell.value());
    }

    /// Begin a timed span; see [`Activity`]
    pub fn start_activity(&self, name: &str) -> Activity<'_> {
        Activity::start(self, name)
    }

    /// Run a fallible future inside an activity named `name`
    ///
    /// If the returned future is dropped before completion the activity
    /// records a failure.
    pub async fn instrument<T, E, F>(&self, name: &str, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        let activity = self.start_activity(name);
        let result = fut.await;
        match result {
            Ok(_) => activity.complete(),
            Err(_) => activity.fail(),
        };
        result
    }

    /// Run a fallible closure inside an activity named `name`
    pub fn track<T, E, F>(&self, name: &str, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let activity = self.start_activity(name);
        let result = f();
        match result {
            Ok(_) => activity.complete(),
            Err(_) => activity.fail(),
        };
        result
    }

    /// Copy all metrics and the most recent events
    ///
    /// Each map shard is read-locked only while its values are copied; the
    /// event log lock is held only for cloning the tail.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        let mut counters: BTreeMap<String, u64> = self
            .counters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect();

        let mut timings: BTreeMap<String, (u64, u64, u64)> = self
            .durations
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().raw()))
            .collect();

        for entry in self.activities.iter() {
            let cell = entry.value();
            let errors = cell.errors.load(Ordering::Acquire);
            let count = cell.count.load(Ordering::Acquire);
            *counters.entry(format!("{}.count", entry.key())).or_default() += count;
            *counters.entry(format!("{}.errors", entry.key())).or_default() += errors;

            let (n, total, max) = cell.timing.raw();
            let merged = timings.entry(entry.key().clone()).or_default();
            merged.0 += n;
            merged.1 += total;
            merged.2 = merged.2.max(max);
        }

        let durations = timings
            .into_iter()
            .map(|(name, (n, total, max))| (name, DurationStat::from_micros(n, total, max)))
            .collect();

        let recent_events = {
            let log = self.lock_events();
            let skip = log.buffer.len().saturating_sub(self.config.snapshot_events);
            log.buffer.iter().skip(skip).cloned().collect()
        };

        MetricsSnapshot {
            taken_at: Utc::now(),
            uptime_ms: u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX),
            counters,
            durations,
            recent_events,
            events_recorded: self.events_recorded.load(Ordering::Relaxed),
            events_evicted: self.events_evicted.load(Ordering::Relaxed),
            events_filtered: self.events_filtered.load(Ordering::Relaxed),
        }
    }

    /// All retained events whose name matches, oldest first
    pub fn events_named(&self, name: &str) -> Vec<TelemetryEvent> {
        self.lock_events()
            .buffer
            .iter()
            .filter(|event| event.name == name)
            .cloned()
            .collect()
    }

    /// A panic while holding the lock leaves the log usable; recover it
    fn lock_events(&self) -> MutexGuard<'_, EventLog> {
        self.events.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("telemetry event log lock was poisoned; recovering");
            poisoned.into_inner()
        })
    }
}

fn as_micros(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}

fn mirror_to_tracing(level: TelemetryLevel, name: &str, attributes: &Attributes) {
    match level {
        TelemetryLevel::Debug => {
            tracing::debug!(target: "uiknow::telemetry", event = name, ?attributes)
        }
        TelemetryLevel::Info => {
            tracing::info!(target: "uiknow::telemetry", event = name, ?attributes)
        }
        TelemetryLevel::Warn => {
            tracing::warn!(target: "uiknow::telemetry", event = name, ?attributes)
        }
        TelemetryLevel::Error => {
            tracing::error!(target: "uiknow::telemetry", event = name, ?attributes)
        }
        TelemetryLevel::Off => {}
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    use super::*;
    use crate::telemetry::event::attrs;

    fn aggregator(max_events: usize, snapshot_events: usize) -> TelemetryAggregator {
        TelemetryAggregator::new(TelemetryConfig {
            min_level: TelemetryLevel::Info,
            max_events,
            snapshot_events,
        })
    }

    #[test]
    fn test_activity_success_and_failure() {
        let telemetry = TelemetryAggregator::default();

        telemetry.start_activity("x").complete();
        let snap = telemetry.metrics_snapshot();
        assert_eq!(snap.counter("x.count"), 1);
        assert_eq!(snap.counter("x.errors"), 0);
        assert_eq!(snap.duration("x").map(|d| d.count), Some(1));

        telemetry.start_activity("x").fail();
        let snap = telemetry.metrics_snapshot();
        assert_eq!(snap.counter("x.count"), 2);
        assert_eq!(snap.counter("x.errors"), 1);
        assert_eq!(snap.duration("x").map(|d| d.count), Some(2));
    }

    #[test]
    fn test_track_propagates_result() {
        let telemetry = TelemetryAggregator::default();

        let ok: Result<u32, String> = telemetry.track("op", || Ok(4));
        assert_eq!(ok, Ok(4));
        let err: Result<u32, String> = telemetry.track("op", || Err("boom".to_string()));
        assert_eq!(err, Err("boom".to_string()));

        let snap = telemetry.metrics_snapshot();
        assert_eq!(snap.counter("op.count"), 2);
        assert_eq!(snap.counter("op.errors"), 1);
    }

    #[tokio::test]
    async fn test_instrument_async() {
        let telemetry = TelemetryAggregator::default();

        let result: Result<(), &str> = telemetry
            .instrument("fetch", async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Err("unavailable")
            })
            .await;
        assert!(result.is_err());

        let snap = telemetry.metrics_snapshot();
        assert_eq!(snap.counter("fetch.count"), 1);
        assert_eq!(snap.counter("fetch.errors"), 1);
        assert!(snap.duration("fetch").map(|d| d.max_ms).unwrap_or(0.0) >= 5.0);
    }

    #[test]
    fn test_snapshot_is_independent() {
        let telemetry = TelemetryAggregator::default();
        telemetry.increment_counter("hits", 3);

        let first = telemetry.metrics_snapshot();
        let frozen = first.clone();

        telemetry.increment_counter("hits", 2);
        telemetry.increment_counter("misses", 1);
        let second = telemetry.metrics_snapshot();

        assert_eq!(first, frozen);
        assert_eq!(first.counter("hits"), 3);
        assert_eq!(second.counter("hits"), 5);
        for (name, value) in &first.counters {
            assert!(second.counter(name) >= *value);
        }
    }

    #[test]
    fn test_event_log_evicts_oldest() {
        let telemetry = aggregator(3, 10);
        for i in 0..5u64 {
            telemetry.record_event("tick", attrs([("i", i.into())]));
        }

        let snap = telemetry.metrics_snapshot();
        let seqs: Vec<u64> = snap.recent_events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![2, 3, 4]);
        assert_eq!(snap.events_recorded, 5);
        assert_eq!(snap.events_evicted, 2);
    }

    #[test]
    fn test_snapshot_keeps_latest_events() {
        let telemetry = aggregator(100, 2);
        for i in 0..5u64 {
            telemetry.record_event("tick", attrs([("i", i.into())]));
        }

        let snap = telemetry.metrics_snapshot();
        let seqs: Vec<u64> = snap.recent_events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![3, 4]);
        assert_eq!(telemetry.events_named("tick").len(), 5);
    }

    #[test]
    fn test_min_level_filters_events() {
        let telemetry = TelemetryAggregator::new(TelemetryConfig {
            min_level: TelemetryLevel::Warn,
            ..TelemetryConfig::default()
        });

        telemetry.record_event("quiet", Attributes::new());
        telemetry.record_event_at(TelemetryLevel::Error, "loud", Attributes::new());

        let snap = telemetry.metrics_snapshot();
        assert_eq!(snap.events_filtered, 1);
        assert_eq!(snap.recent_events.len(), 1);
        assert_eq!(snap.recent_events[0].name, "loud");
    }

    #[test]
    fn test_concurrent_increments() {
        let telemetry = Arc::new(TelemetryAggregator::default());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let telemetry = Arc::clone(&telemetry);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        telemetry.increment_counter("shared", 1);
                        telemetry.record_duration("work", Duration::from_micros(10));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snap = telemetry.metrics_snapshot();
        assert_eq!(snap.counter("shared"), 8000);
        assert_eq!(snap.duration("work").map(|d| d.count), Some(8000));
    }

    #[test]
    fn test_snapshot_never_shows_more_errors_than_count() {
        let telemetry = Arc::new(TelemetryAggregator::default());
        let done = Arc::new(AtomicBool::new(false));

        let writers: Vec<_> = (0..4)
            .map(|i| {
                let telemetry = Arc::clone(&telemetry);
                let done = Arc::clone(&done);
                std::thread::spawn(move || {
                    while !done.load(Ordering::Relaxed) {
                        if i % 2 == 0 {
                            telemetry.start_activity("x").fail();
                        } else {
                            telemetry.start_activity("x").complete();
                        }
                    }
                })
            })
            .collect();

        let mut torn = 0;
        for _ in 0..20_000 {
            let snap = telemetry.metrics_snapshot();
            if snap.counter("x.errors") > snap.counter("x.count") {
                torn += 1;
            }
        }
        done.store(true, Ordering::Relaxed);
        for writer in writers {
            writer.join().unwrap();
        }

        assert_eq!(torn, 0);
        let snap = telemetry.metrics_snapshot();
        assert!(snap.counter("x.count") > 0);
        assert_eq!(snap.duration("x").map(|d| d.count), Some(snap.counter("x.count")));
    }

    #[test]
    fn test_activity_and_counter_names_merge() {
        let telemetry = TelemetryAggregator::default();
        telemetry.increment_counter("sync.count", 2);
        telemetry.record_duration("sync", Duration::from_millis(1));
        telemetry.start_activity("sync").complete();

        let snap = telemetry.metrics_snapshot();
        assert_eq!(snap.counter("sync.count"), 3);
        assert_eq!(snap.counter("sync.errors"), 0);
        assert_eq!(snap.duration("sync").map(|d| d.count), Some(2));
    }
}
