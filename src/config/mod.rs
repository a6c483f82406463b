//! Configuration module
//!
//! Resolution order:
//! 1. Explicit `--config` path (or `UIKNOW_CONFIG`)
//! 2. Local `.uiknow/config.toml`, walking up from the current directory
//! 3. Global config in the platform config dir
//! 4. Defaults
//!
//! Environment overrides (`UIKNOW_DATA_DIR`, `UIKNOW_TELEMETRY_LEVEL`) are
//! applied once after loading; the result is never re-read.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::artifact::{ArtifactStore, BundledStore, DirectoryStore};
use crate::core::cache::CacheConfig;
use crate::telemetry::{TelemetryConfig, TelemetryLevel};

pub const ENV_DATA_DIR: &str = "UIKNOW_DATA_DIR";
pub const ENV_TELEMETRY_LEVEL: &str = "UIKNOW_TELEMETRY_LEVEL";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub cache: CacheSection,

    #[serde(default)]
    pub telemetry: TelemetrySection,
}

/// Where artifacts come from
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    /// Directory of `<key>.json` files; bundled artifacts when unset
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSection {
    /// Keys preloaded at startup
    #[serde(default = "default_common_keys")]
    pub common_keys: Vec<String>,

    #[serde(default = "default_preload_timeout_ms")]
    pub preload_timeout_ms: u64,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Enables LRU eviction beyond this many artifacts
    #[serde(default)]
    pub max_entries: Option<usize>,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            common_keys: default_common_keys(),
            preload_timeout_ms: default_preload_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            max_entries: None,
        }
    }
}

fn default_common_keys() -> Vec<String> {
    vec![
        "controls".to_string(),
        "patterns".to_string(),
        "migration".to_string(),
    ]
}

fn default_preload_timeout_ms() -> u64 {
    5000
}

fn default_request_timeout_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySection {
    #[serde(default)]
    pub level: TelemetryLevel,

    #[serde(default = "default_max_events")]
    pub max_events: usize,

    #[serde(default = "default_snapshot_events")]
    pub snapshot_events: usize,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            level: TelemetryLevel::default(),
            max_events: default_max_events(),
            snapshot_events: default_snapshot_events(),
        }
    }
}

fn default_max_events() -> usize {
    10_000
}

fn default_snapshot_events() -> usize {
    50
}

impl Config {
    /// Load config (explicit path first, then local, then global) and apply env overrides
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load_from(path)?,
            None => Self::discover()?,
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    fn discover() -> Result<Self> {
        if let Some(local) = Self::find_local_config() {
            return Self::load_from(&local);
        }

        if let Some(global) = Self::global_config_path() {
            if global.exists() {
                return Self::load_from(&global);
            }
        }

        Ok(Self::default())
    }

    /// Load config from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        Ok(config)
    }

    /// Apply environment overrides using `lookup` to read variables
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_DATA_DIR).filter(|v| !v.trim().is_empty()) {
            self.store.data_dir = Some(PathBuf::from(dir));
        }

        if let Some(level) = lookup(ENV_TELEMETRY_LEVEL).filter(|v| !v.trim().is_empty()) {
            self.telemetry.level = level
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .with_context(|| format!("Invalid {}", ENV_TELEMETRY_LEVEL))?;
        }

        Ok(())
    }

    /// Find local .uiknow/config.toml walking up directories
    pub fn find_local_config() -> Option<PathBuf> {
        let mut current = std::env::current_dir().ok()?;

        loop {
            let config_path = current.join(".uiknow").join("config.toml");
            if config_path.exists() {
                return Some(config_path);
            }

            if !current.pop() {
                break;
            }
        }

        None
    }

    /// Global config path, e.g. ~/.config/uiknow/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "uiknow", "uiknow")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Artifact store selected by `store.data_dir`
    pub fn build_store(&self) -> Arc<dyn ArtifactStore> {
        match &self.store.data_dir {
            Some(dir) => Arc::new(DirectoryStore::new(dir.clone())),
            None => Arc::new(BundledStore::new()),
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_entries: self.cache.max_entries,
        }
    }

    pub fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            min_level: self.telemetry.level,
            max_events: self.telemetry.max_events,
            snapshot_events: self.telemetry.snapshot_events,
        }
    }

    pub fn preload_timeout(&self) -> Duration {
        Duration::from_millis(self.cache.preload_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.cache.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.cache.common_keys, vec!["controls", "patterns", "migration"]);
        assert_eq!(config.telemetry.level, TelemetryLevel::Info);
        assert_eq!(config.request_timeout(), Duration::from_secs(2));
        assert!(config.store.data_dir.is_none());
    }

    #[test]
    fn test_load_from_partial_toml() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[cache]
common_keys = ["controls"]
max_entries = 8

[telemetry]
level = "warn"
"#,
        )?;

        let config = Config::load_from(&path)?;
        assert_eq!(config.cache.common_keys, vec!["controls"]);
        assert_eq!(config.cache.max_entries, Some(8));
        assert_eq!(config.cache.preload_timeout_ms, 5000);
        assert_eq!(config.telemetry.level, TelemetryLevel::Warn);
        assert_eq!(config.telemetry.max_events, 10_000);
        Ok(())
    }

    #[test]
    fn test_env_overrides() -> Result<()> {
        let env: HashMap<&str, &str> = [
            (ENV_DATA_DIR, "/srv/kb"),
            (ENV_TELEMETRY_LEVEL, "debug"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|name| env.get(name).map(|v| v.to_string()))?;

        assert_eq!(config.store.data_dir, Some(PathBuf::from("/srv/kb")));
        assert_eq!(config.telemetry_config().min_level, TelemetryLevel::Debug);
        Ok(())
    }

    #[test]
    fn test_invalid_env_level_is_an_error() {
        let mut config = Config::default();
        let result = config.apply_env(|name| {
            (name == ENV_TELEMETRY_LEVEL).then(|| "chatty".to_string())
        });
        assert!(result.is_err());
    }
}
