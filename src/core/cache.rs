//! Resource cache - singleflight artifact cache
//!
//! Each key maps to exactly one slot: either a ready [`CacheEntry`] or a
//! shared in-flight load. The first caller to miss installs the load slot
//! while holding the key's shard lock, so every concurrent caller for that key
//! attaches to the same load instead of starting another.
//!
//! # Lifecycle of a key
//! ```text
//! (absent) --miss--> Loading --ok--> Ready --invalidate/evict--> (absent)
//!                       |
//!                       +--err--> (absent, next get retries)
//! ```
//!
//! Loads run on a detached task. A waiter that times out or is cancelled
//! only stops waiting; the load still completes and fills the cache.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tokio::sync::oneshot;

use super::artifact::{Artifact, ArtifactStore};
use super::error::{KbError, KbResult};
use crate::telemetry::{AttrValue, Attributes, TelemetryAggregator, TelemetryLevel};

/// Shared, single-resolution handle on an in-flight load
type LoadFuture = Shared<BoxFuture<'static, KbResult<Artifact>>>;

/// Cache settings
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    /// Bound on ready entries; least recently used entries are evicted beyond it
    pub max_entries: Option<usize>,
}

struct CacheEntry {
    artifact: Artifact,
    loaded_at: DateTime<Utc>,
    hits: AtomicU64,
    /// Logical access clock value of the most recent hit (or the load)
    last_access: AtomicU64,
}

enum Slot {
    Ready(CacheEntry),
    Loading(LoadFuture),
}

/// Bookkeeping for one cached key
#[derive(Debug, Clone, Serialize)]
pub struct EntryInfo {
    pub key: String,
    pub loaded_at: DateTime<Utc>,
    pub hits: u64,
}

/// Slot counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub ready: usize,
    pub loading: usize,
    pub max_entries: Option<usize>,
}

/// One key that failed during preload
#[derive(Debug, Clone)]
pub struct PreloadFailure {
    pub key: String,
    pub error: KbError,
}

/// Outcome of a bulk preload
#[derive(Debug, Clone, Default)]
pub struct PreloadReport {
    pub loaded: Vec<String>,
    pub failed: Vec<PreloadFailure>,
    pub elapsed: Duration,
}

impl PreloadReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// `complete`, `partial` or `failed`
    pub fn outcome(&self) -> &'static str {
        match (self.loaded.is_empty(), self.failed.is_empty()) {
            (_, true) => "complete",
            (false, false) => "partial",
            (true, false) => "failed",
        }
    }

    fn to_attributes(&self) -> Attributes {
        let mut out = Attributes::new();
        out.insert("outcome".into(), self.outcome().into());
        out.insert(
            "requested".into(),
            (self.loaded.len() + self.failed.len()).into(),
        );
        out.insert("loaded".into(), self.loaded.len().into());
        out.insert("failed".into(), self.failed.len().into());
        out.insert(
            "duration_ms".into(),
            AttrValue::Float(self.elapsed.as_secs_f64() * 1000.0),
        );
        for key in &self.loaded {
            out.insert(format!("key.{}", key), "ok".into());
        }
        for failure in &self.failed {
            out.insert(format!("key.{}", failure.key), failure.error.kind().into());
        }
        out
    }
}

enum Lookup {
    Hit(Artifact),
    Pending(LoadFuture),
}

struct Inner {
    store: Arc<dyn ArtifactStore>,
    telemetry: Arc<TelemetryAggregator>,
    config: CacheConfig,
    slots: DashMap<String, Slot>,
    access_clock: AtomicU64,
}

/// Process-wide artifact cache; clones share the same slots
#[derive(Clone)]
pub struct ResourceCache {
    inner: Arc<Inner>,
}

impl ResourceCache {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        telemetry: Arc<TelemetryAggregator>,
        config: CacheConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                telemetry,
                config,
                slots: DashMap::new(),
                access_clock: AtomicU64::new(0),
            }),
        }
    }

    /// The backing store
    pub fn store(&self) -> &dyn ArtifactStore {
        self.inner.store.as_ref()
    }

    pub fn telemetry(&self) -> &Arc<TelemetryAggregator> {
        &self.inner.telemetry
    }

    /// Fetch an artifact, loading it at most once across concurrent callers
    pub async fn get(&self, key: &str) -> KbResult<Artifact> {
        match self.lookup(key) {
            Lookup::Hit(artifact) => Ok(artifact),
            Lookup::Pending(load) => load.await,
        }
    }

    /// Like [`get`](Self::get), but stop waiting after `deadline`
    ///
    /// Timing out leaves the in-flight load and its other waiters untouched.
    pub async fn get_with_deadline(&self, key: &str, deadline: Duration) -> KbResult<Artifact> {
        let load = match self.lookup(key) {
            Lookup::Hit(artifact) => return Ok(artifact),
            Lookup::Pending(load) => load,
        };

        match tokio::time::timeout(deadline, load).await {
            Ok(result) => result,
            Err(_) => {
                let waited_ms = as_millis(deadline);
                self.inner.telemetry.increment_counter("cache.timeouts", 1);
                tracing::debug!(key, deadline_ms = waited_ms, "gave up waiting for artifact");
                Err(KbError::Timeout {
                    key: key.to_string(),
                    waited_ms,
                })
            }
        }
    }

    /// Load every key concurrently, collecting failures instead of stopping
    pub async fn preload<S: AsRef<str>>(&self, keys: &[S]) -> PreloadReport {
        self.preload_inner(keys, None).await
    }

    /// Preload with a per-key wait deadline
    pub async fn preload_with_deadline<S: AsRef<str>>(
        &self,
        keys: &[S],
        deadline: Duration,
    ) -> PreloadReport {
        self.preload_inner(keys, Some(deadline)).await
    }

    async fn preload_inner<S: AsRef<str>>(
        &self,
        keys: &[S],
        deadline: Option<Duration>,
    ) -> PreloadReport {
        let started = Instant::now();

        let mut unique: Vec<&str> = Vec::with_capacity(keys.len());
        for key in keys {
            let key = key.as_ref();
            if !unique.contains(&key) {
                unique.push(key);
            }
        }

        let loads = unique.iter().map(|key| async move {
            let result = match deadline {
                Some(deadline) => self.get_with_deadline(key, deadline).await,
                None => self.get(key).await,
            };
            (*key, result)
        });
        let results = futures::future::join_all(loads).await;

        let mut report = PreloadReport::default();
        for (key, result) in results {
            match result {
                Ok(_) => report.loaded.push(key.to_string()),
                Err(error) => report.failed.push(PreloadFailure {
                    key: key.to_string(),
                    error,
                }),
            }
        }
        report.elapsed = started.elapsed();

        tracing::info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            elapsed_ms = as_millis(report.elapsed),
            "preload finished"
        );
        self.inner
            .telemetry
            .record_event("cache.preload", report.to_attributes());

        report
    }

    /// Drop a ready entry so the next `get` reloads it
    ///
    /// Returns whether an entry was removed. Fails with `InvalidState` while
    /// the key is loading.
    pub fn invalidate(&self, key: &str) -> KbResult<bool> {
        match self.inner.slots.entry(key.to_string()) {
            Entry::Occupied(occupied) => {
                if matches!(occupied.get(), Slot::Loading(_)) {
                    return Err(KbError::InvalidState(format!(
                        "cannot invalidate '{}' while it is loading",
                        key
                    )));
                }
                occupied.remove();
                self.inner
                    .telemetry
                    .increment_counter("cache.invalidations", 1);
                tracing::debug!(key, "artifact invalidated");
                Ok(true)
            }
            Entry::Vacant(_) => Ok(false),
        }
    }

    /// True when the key is cached and ready
    pub fn contains(&self, key: &str) -> bool {
        self.inner
            .slots
            .get(key)
            .is_some_and(|slot| matches!(slot.value(), Slot::Ready(_)))
    }

    pub fn entry_info(&self, key: &str) -> Option<EntryInfo> {
        let slot = self.inner.slots.get(key)?;
        match slot.value() {
            Slot::Ready(entry) => Some(EntryInfo {
                key: key.to_string(),
                loaded_at: entry.loaded_at,
                hits: entry.hits.load(Ordering::Relaxed),
            }),
            Slot::Loading(_) => None,
        }
    }

    /// Ready keys, sorted
    pub fn cached_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .inner
            .slots
            .iter()
            .filter(|slot| matches!(slot.value(), Slot::Ready(_)))
            .map(|slot| slot.key().clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            max_entries: self.inner.config.max_entries,
            ..CacheStats::default()
        };
        for slot in self.inner.slots.iter() {
            match slot.value() {
                Slot::Ready(_) => stats.ready += 1,
                Slot::Loading(_) => stats.loading += 1,
            }
        }
        stats
    }

    /// Resolve `key` to a ready artifact or the load to wait on
    fn lookup(&self, key: &str) -> Lookup {
        // Fast path: shared shard lock only
        if let Some(slot) = self.inner.slots.get(key) {
            return self.inner.observe(key, slot.value());
        }

        match self.inner.slots.entry(key.to_string()) {
            Entry::Occupied(occupied) => self.inner.observe(key, occupied.get()),
            Entry::Vacant(vacant) => {
                self.inner.telemetry.increment_counter("cache.misses", 1);
                tracing::debug!(key, "cache miss, starting load");
                let load = Inner::spawn_load(Arc::clone(&self.inner), key.to_string());
                vacant.insert(Slot::Loading(load.clone()));
                Lookup::Pending(load)
            }
        }
    }
}

impl Inner {
    fn observe(&self, key: &str, slot: &Slot) -> Lookup {
        match slot {
            Slot::Ready(entry) => {
                entry.hits.fetch_add(1, Ordering::Relaxed);
                entry.last_access.store(self.tick(), Ordering::Relaxed);
                self.telemetry.increment_counter("cache.hits", 1);
                Lookup::Hit(entry.artifact.clone())
            }
            Slot::Loading(load) => {
                self.telemetry.increment_counter("cache.coalesced", 1);
                tracing::debug!(key, "joining in-flight load");
                Lookup::Pending(load.clone())
            }
        }
    }

    fn tick(&self) -> u64 {
        self.access_clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Start the load on a detached task and return the shared result handle
    ///
    /// If the task is dropped without sending (its runtime shut down), the
    /// first waiter to notice clears the slot so a later `get` retries.
    fn spawn_load(inner: Arc<Inner>, key: String) -> LoadFuture {
        let (tx, rx) = oneshot::channel();
        let abandoned = Arc::downgrade(&inner);

        let task_key = key.clone();
        tokio::spawn(async move {
            let result = inner.load(&task_key).await;
            // Settle the slot before waking waiters so they observe a hit on retry
            inner.settle(&task_key, &result);
            let _ = tx.send(result);
        });

        rx.map(move |received| {
            received.unwrap_or_else(|_| {
                tracing::warn!(key = %key, "load task ended without a result");
                if let Some(inner) = abandoned.upgrade() {
                    inner
                        .slots
                        .remove_if(&key, |_, slot| matches!(slot, Slot::Loading(_)));
                }
                Err(KbError::InvalidState(format!(
                    "load task for '{}' ended without a result",
                    key
                )))
            })
        })
        .boxed()
        .shared()
    }

    async fn load(&self, key: &str) -> KbResult<Artifact> {
        let store = Arc::clone(&self.store);
        let blocking_key = key.to_string();

        self.telemetry
            .instrument("cache.load", async move {
                tokio::task::spawn_blocking(move || store.load(&blocking_key))
                    .await
                    .unwrap_or_else(|e| {
                        Err(KbError::InvalidState(format!("artifact load task failed: {}", e)))
                    })
            })
            .await
    }

    fn settle(&self, key: &str, result: &KbResult<Artifact>) {
        match result {
            Ok(artifact) => {
                let entry = CacheEntry {
                    artifact: artifact.clone(),
                    loaded_at: Utc::now(),
                    hits: AtomicU64::new(0),
                    last_access: AtomicU64::new(self.tick()),
                };
                self.slots.insert(key.to_string(), Slot::Ready(entry));
                self.telemetry.increment_counter("cache.loads", 1);
                tracing::info!(key, store = self.store.name(), "artifact cached");
                self.enforce_capacity(key);
            }
            Err(error) => {
                self.slots
                    .remove_if(key, |_, slot| matches!(slot, Slot::Loading(_)));
                self.telemetry.increment_counter("cache.load_failures", 1);

                if let KbError::ArtifactCorrupt { reason, .. } = error {
                    tracing::warn!(key, store = self.store.name(), %reason, "artifact is corrupt");
                    self.telemetry.record_event_at(
                        TelemetryLevel::Warn,
                        "cache.corrupt_artifact",
                        crate::telemetry::attrs([
                            ("key", key.into()),
                            ("store", self.store.name().into()),
                            ("reason", reason.as_str().into()),
                        ]),
                    );
                } else {
                    tracing::debug!(key, error = %error, "artifact load failed");
                }
            }
        }
    }

    /// Evict least recently used ready entries beyond `max_entries`
    fn enforce_capacity(&self, just_loaded: &str) {
        let Some(max) = self.config.max_entries else {
            return;
        };
        let max = max.max(1);

        loop {
            let mut ready = 0usize;
            let mut victim: Option<(String, u64)> = None;
            for slot in self.slots.iter() {
                if let Slot::Ready(entry) = slot.value() {
                    ready += 1;
                    if slot.key() == just_loaded {
                        continue;
                    }
                    let access = entry.last_access.load(Ordering::Relaxed);
                    if victim.as_ref().is_some_and(|(_, best)| *best <= access) {
                        continue;
                    }
                    victim = Some((slot.key().clone(), access));
                }
            }

            if ready <= max {
                return;
            }
            let Some((victim, _)) = victim else {
                return;
            };

            let removed = self
                .slots
                .remove_if(&victim, |_, slot| matches!(slot, Slot::Ready(_)));
            if removed.is_some() {
                self.telemetry.increment_counter("cache.evictions", 1);
                tracing::debug!(key = %victim, "evicted least recently used artifact");
            }
        }
    }
}

fn as_millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
