//! Runtime - explicit construction of the process-wide singletons
//!
//! One [`Runtime`] owns the telemetry aggregator and the resource cache for
//! the whole process. Everything else receives them by handle.
//!
//! # Lifecycle
//! 1. `build` - construct aggregator, store and cache, record `process.start`
//! 2. `warm` - preload the common keys (failures degrade to lazy loading)
//! 3. serve requests through [`KnowledgeOps`]
//! 4. `shutdown` - snapshot metrics, record `process.shutdown`

use std::sync::Arc;

use ulid::Ulid;

use crate::config::Config;
use crate::core::artifact::ArtifactStore;
use crate::core::cache::{PreloadReport, ResourceCache};
use crate::ops::KnowledgeOps;
use crate::telemetry::{attrs, MetricsSnapshot, TelemetryAggregator};

/// Process-wide cache and telemetry, constructed once at startup
pub struct Runtime {
    config: Config,
    run_id: Ulid,
    telemetry: Arc<TelemetryAggregator>,
    cache: ResourceCache,
}

impl Runtime {
    /// Construct with the store selected by the config
    pub fn build(config: Config) -> Self {
        let store = config.build_store();
        Self::with_store(config, store)
    }

    /// Construct with an explicit store
    pub fn with_store(config: Config, store: Arc<dyn ArtifactStore>) -> Self {
        let run_id = Ulid::new();
        let telemetry = Arc::new(TelemetryAggregator::new(config.telemetry_config()));
        let store_name = store.name().to_string();
        let cache = ResourceCache::new(store, Arc::clone(&telemetry), config.cache_config());

        telemetry.record_event(
            "process.start",
            attrs([
                ("run_id", run_id.to_string().into()),
                ("store", store_name.into()),
                ("telemetry_level", telemetry.min_level().to_string().into()),
                ("version", env!("CARGO_PKG_VERSION").into()),
            ]),
        );

        Self {
            config,
            run_id,
            telemetry,
            cache,
        }
    }

    /// Build and preload the common keys
    pub async fn start(config: Config) -> (Self, PreloadReport) {
        let runtime = Self::build(config);
        let report = runtime.warm().await;
        (runtime, report)
    }

    /// Preload the configured common keys
    ///
    /// Never fails: keys that could not load are simply fetched on demand later.
    pub async fn warm(&self) -> PreloadReport {
        let report = self
            .cache
            .preload_with_deadline(&self.config.cache.common_keys, self.config.preload_timeout())
            .await;

        for failure in &report.failed {
            tracing::warn!(key = %failure.key, error = %failure.error, "preload failed; will load on demand");
        }
        report
    }

    /// Snapshot metrics and record the final `process.shutdown` event
    pub fn shutdown(&self, reason: &str) -> MetricsSnapshot {
        let snapshot = self.telemetry.metrics_snapshot();

        let mut attributes = snapshot.to_attributes();
        attributes.insert("run_id".into(), self.run_id.to_string().into());
        attributes.insert("reason".into(), reason.into());
        self.telemetry.record_event("process.shutdown", attributes);

        tracing::info!(reason, uptime_ms = snapshot.uptime_ms, "shutdown complete");
        snapshot
    }

    /// Caller-facing operations bound to this runtime
    pub fn ops(&self) -> KnowledgeOps {
        KnowledgeOps::new(self.cache.clone(), self.config.request_timeout())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn run_id(&self) -> Ulid {
        self.run_id
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    pub fn telemetry(&self) -> &Arc<TelemetryAggregator> {
        &self.telemetry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::artifact::BundledStore;
    use crate::telemetry::AttrValue;

    #[tokio::test]
    async fn test_start_preloads_common_keys() {
        let (runtime, report) = Runtime::start(Config::default()).await;

        assert!(report.is_complete());
        assert_eq!(runtime.cache().cached_keys(), vec!["controls", "migration", "patterns"]);

        let starts = runtime.telemetry().events_named("process.start");
        assert_eq!(starts.len(), 1);
        assert_eq!(starts[0].attr("store"), Some(&AttrValue::from("bundled")));
        assert_eq!(runtime.telemetry().events_named("cache.preload").len(), 1);
    }

    #[tokio::test]
    async fn test_startup_survives_total_preload_failure() {
        let mut config = Config::default();
        config.cache.common_keys = vec!["nope".to_string(), "also-nope".to_string()];

        let (runtime, report) = Runtime::start(config).await;
        assert_eq!(report.outcome(), "failed");
        assert_eq!(report.failed.len(), 2);

        // Lazy loading still works
        let artifact = runtime.cache().get("controls").await.unwrap();
        assert_eq!(artifact.key(), "controls");
    }

    #[tokio::test]
    async fn test_shutdown_records_snapshot_event() {
        let runtime = Runtime::with_store(Config::default(), Arc::new(BundledStore::new()));
        runtime.cache().get("patterns").await.unwrap();
        runtime.cache().get("patterns").await.unwrap();

        let snapshot = runtime.shutdown("test");
        assert_eq!(snapshot.counter("cache.hits"), 1);

        let events = runtime.telemetry().events_named("process.shutdown");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].attr("reason"), Some(&AttrValue::from("test")));
        assert_eq!(events[0].attr("counter.cache.hits"), Some(&AttrValue::Int(1)));
        assert_eq!(
            events[0].attr("run_id"),
            Some(&AttrValue::from(runtime.run_id().to_string()))
        );
    }
}
