//! Artifacts and the stores that load them
//!
//! An artifact is one knowledge-base category (e.g. `controls`, `patterns`)
//! parsed into an immutable JSON tree. Stores are stateless: each `load`
//! reads and parses from scratch and keeps no reference to the result.
//!
//! # Artifact shape
//! ```json
//! {
//!   "category": "controls",
//!   "entries": { "Button": { "summary": "..." } }
//! }
//! ```
//! `entries` is required (object or array). `category` is optional but must
//! match the key when present.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;

use super::error::{KbError, KbResult};

const MAX_KEY_LEN: usize = 64;

/// Immutable parsed knowledge-base value
///
/// Cloning is cheap: all clones share one parsed tree.
#[derive(Clone)]
pub struct Artifact {
    inner: Arc<ArtifactData>,
}

struct ArtifactData {
    key: String,
    value: Value,
}

impl Artifact {
    fn new(key: &str, value: Value) -> Self {
        Self {
            inner: Arc::new(ArtifactData {
                key: key.to_string(),
                value,
            }),
        }
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// The full parsed document
    pub fn value(&self) -> &Value {
        &self.inner.value
    }

    /// The `entries` member (always present after validation)
    pub fn entries(&self) -> &Value {
        &self.inner.value["entries"]
    }

    /// Names of entries when `entries` is an object, indices otherwise
    pub fn entry_names(&self) -> Vec<String> {
        match self.entries() {
            Value::Object(map) => map.keys().cloned().collect(),
            Value::Array(items) => (0..items.len()).map(|i| i.to_string()).collect(),
            _ => Vec::new(),
        }
    }

    /// Resolve an RFC 6901 JSON pointer against the document
    pub fn pointer(&self, pointer: &str) -> Option<&Value> {
        self.inner.value.pointer(pointer)
    }

    /// True when both handles share the same parsed tree
    pub fn ptr_eq(a: &Artifact, b: &Artifact) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("key", &self.inner.key)
            .field("entries", &self.entry_names().len())
            .finish()
    }
}

/// Durable source of artifacts
///
/// `load` may block on I/O; the cache calls it from a blocking task.
pub trait ArtifactStore: Send + Sync {
    /// Read and parse the artifact for `key`
    fn load(&self, key: &str) -> KbResult<Artifact>;

    /// Keys this store can serve, sorted
    fn keys(&self) -> Vec<String>;

    /// Human-readable name for logs
    fn name(&self) -> &str;
}

/// Keys are short lowercase identifiers; anything else can never map to a resource
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

/// Parse raw content into an artifact and run the schema sanity check
pub fn parse_artifact(key: &str, content: &str) -> KbResult<Artifact> {
    let value: Value = serde_json::from_str(content)
        .map_err(|e| KbError::corrupt(key, format!("invalid JSON: {}", e)))?;

    let obj = value
        .as_object()
        .ok_or_else(|| KbError::corrupt(key, "top level is not an object"))?;

    match obj.get("entries") {
        Some(Value::Object(_)) | Some(Value::Array(_)) => {}
        Some(_) => return Err(KbError::corrupt(key, "'entries' must be an object or array")),
        None => return Err(KbError::corrupt(key, "missing 'entries'")),
    }

    if let Some(category) = obj.get("category") {
        if category.as_str() != Some(key) {
            return Err(KbError::corrupt(
                key,
                format!("category {} does not match key", category),
            ));
        }
    }

    Ok(Artifact::new(key, value))
}

const BUNDLED: &[(&str, &str)] = &[
    ("controls", include_str!("../../data/controls.json")),
    ("migration", include_str!("../../data/migration.json")),
    ("patterns", include_str!("../../data/patterns.json")),
];

/// Artifacts compiled into the binary
#[derive(Debug, Clone, Copy, Default)]
pub struct BundledStore;

impl BundledStore {
    pub fn new() -> Self {
        Self
    }
}

impl ArtifactStore for BundledStore {
    fn load(&self, key: &str) -> KbResult<Artifact> {
        let (_, content) = BUNDLED
            .iter()
            .find(|(name, _)| *name == key)
            .ok_or_else(|| KbError::not_found(key))?;
        parse_artifact(key, content)
    }

    fn keys(&self) -> Vec<String> {
        BUNDLED.iter().map(|(name, _)| name.to_string()).collect()
    }

    fn name(&self) -> &str {
        "bundled"
    }
}

/// Artifacts stored as `<dir>/<key>.json`
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    dir: PathBuf,
    name: String,
}

impl DirectoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let name = format!("dir:{}", dir.display());
        Self { dir, name }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ArtifactStore for DirectoryStore {
    fn load(&self, key: &str) -> KbResult<Artifact> {
        if !is_valid_key(key) {
            return Err(KbError::not_found(key));
        }

        let path = self.dir.join(format!("{}.json", key));
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(KbError::not_found(key));
            }
            Err(e) => {
                return Err(KbError::corrupt(
                    key,
                    format!("failed to read {}: {}", path.display(), e),
                ));
            }
        };

        parse_artifact(key, &content)
    }

    fn keys(&self) -> Vec<String> {
        let Ok(read_dir) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };

        let mut keys: Vec<String> = read_dir
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|path| {
                path.file_stem()
                    .and_then(|s| s.to_str())
                    .map(|s| s.to_string())
            })
            .filter(|key| is_valid_key(key))
            .collect();
        keys.sort();
        keys
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_artifacts_are_valid() {
        let store = BundledStore::new();
        for key in store.keys() {
            let artifact = store.load(&key).unwrap();
            assert_eq!(artifact.key(), key);
            assert!(!artifact.entry_names().is_empty(), "{} has no entries", key);
        }
    }

    #[test]
    fn test_bundled_unknown_key() {
        let err = BundledStore::new().load("bogus").unwrap_err();
        assert_eq!(err, KbError::not_found("bogus"));
    }

    #[test]
    fn test_parse_rejects_bad_shapes() {
        assert_eq!(parse_artifact("k", "not json").unwrap_err().kind(), "corrupt");
        assert_eq!(parse_artifact("k", "[1, 2]").unwrap_err().kind(), "corrupt");
        assert_eq!(parse_artifact("k", r#"{"x": 1}"#).unwrap_err().kind(), "corrupt");
        assert_eq!(
            parse_artifact("k", r#"{"entries": "nope"}"#).unwrap_err().kind(),
            "corrupt"
        );
        assert_eq!(
            parse_artifact("k", r#"{"category": "other", "entries": {}}"#)
                .unwrap_err()
                .kind(),
            "corrupt"
        );
    }

    #[test]
    fn test_parse_and_pointer() {
        let artifact = parse_artifact(
            "controls",
            r#"{"category": "controls", "entries": {"Button": {"since": "1.0"}}}"#,
        )
        .unwrap();
        assert_eq!(artifact.entry_names(), vec!["Button".to_string()]);
        assert_eq!(
            artifact.pointer("/entries/Button/since"),
            Some(&Value::String("1.0".into()))
        );
        assert!(artifact.pointer("/entries/Missing").is_none());
    }

    #[test]
    fn test_key_validation() {
        assert!(is_valid_key("controls"));
        assert!(is_valid_key("data-grid_v2"));
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("../etc/passwd"));
        assert!(!is_valid_key("Controls"));
    }

    #[test]
    fn test_directory_store() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("controls.json"),
            r#"{"entries": {"Button": {}}}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.json"), "{").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let store = DirectoryStore::new(dir.path());
        assert_eq!(store.keys(), vec!["broken".to_string(), "controls".to_string()]);
        assert!(store.load("controls").is_ok());
        assert_eq!(store.load("broken").unwrap_err().kind(), "corrupt");
        assert_eq!(store.load("missing").unwrap_err().kind(), "not_found");
        assert_eq!(store.load("../controls").unwrap_err().kind(), "not_found");
    }
}
