//! Caller-facing operations
//!
//! Each operation reads through the shared [`ResourceCache`] and runs inside
//! a telemetry activity named `op.<operation>`.

use std::time::Duration;

use anyhow::{anyhow, Result};
use serde_json::{json, Value};

use crate::core::cache::ResourceCache;
use crate::telemetry::MetricsSnapshot;

/// Operations consumed by tools and resources
#[derive(Clone)]
pub struct KnowledgeOps {
    cache: ResourceCache,
    request_timeout: Duration,
}

impl KnowledgeOps {
    pub fn new(cache: ResourceCache, request_timeout: Duration) -> Self {
        Self {
            cache,
            request_timeout,
        }
    }

    /// Fetch an artifact, or the value at a JSON pointer inside it
    pub async fn lookup(&self, key: &str, pointer: Option<&str>) -> Result<Value> {
        let telemetry = self.cache.telemetry();
        telemetry
            .instrument("op.lookup", async {
                let artifact = self
                    .cache
                    .get_with_deadline(key, self.request_timeout)
                    .await?;

                match pointer {
                    None => Ok(artifact.value().clone()),
                    Some(pointer) => artifact
                        .pointer(pointer)
                        .cloned()
                        .ok_or_else(|| anyhow!("No value at '{}' in artifact '{}'", pointer, key)),
                }
            })
            .await
    }

    /// Entry names of one artifact
    pub async fn entries(&self, key: &str) -> Result<Vec<String>> {
        let telemetry = self.cache.telemetry();
        telemetry
            .instrument("op.entries", async {
                let artifact = self
                    .cache
                    .get_with_deadline(key, self.request_timeout)
                    .await?;
                Ok(artifact.entry_names())
            })
            .await
    }

    /// Known keys with their cache state
    pub fn list_keys(&self) -> Value {
        let activity = self.cache.telemetry().start_activity("op.list_keys");

        let keys: Vec<Value> = self
            .cache
            .store()
            .keys()
            .into_iter()
            .map(|key| match self.cache.entry_info(&key) {
                Some(info) => json!({
                    "key": key,
                    "cached": true,
                    "hits": info.hits,
                    "loaded_at": info.loaded_at.to_rfc3339(),
                }),
                None => json!({ "key": key, "cached": false }),
            })
            .collect();

        activity.complete();
        json!({ "store": self.cache.store().name(), "keys": keys })
    }

    /// Current metrics snapshot
    pub fn metrics(&self) -> MetricsSnapshot {
        let telemetry = self.cache.telemetry();
        let activity = telemetry.start_activity("op.metrics");
        let snapshot = telemetry.metrics_snapshot();
        activity.complete();
        snapshot
    }
}
