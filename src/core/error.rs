//! Error types for the knowledge-base core
//!
//! `KbError` is `Clone` because a single load failure is handed to every
//! caller waiting on the same in-flight load.

use thiserror::Error;

/// Errors surfaced by the artifact store and resource cache
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KbError {
    /// No backing artifact maps to the key
    #[error("artifact not found: {key}")]
    ArtifactNotFound { key: String },

    /// Stored content could not be parsed or failed the schema check
    #[error("artifact '{key}' is corrupt: {reason}")]
    ArtifactCorrupt { key: String, reason: String },

    /// Misuse of the cache, e.g. invalidating a key while it is loading
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A waiter gave up before the load resolved
    #[error("timed out after {waited_ms}ms waiting for artifact '{key}'")]
    Timeout { key: String, waited_ms: u64 },
}

impl KbError {
    /// Short, stable name used in telemetry attributes
    pub fn kind(&self) -> &'static str {
        match self {
            KbError::ArtifactNotFound { .. } => "not_found",
            KbError::ArtifactCorrupt { .. } => "corrupt",
            KbError::InvalidState(_) => "invalid_state",
            KbError::Timeout { .. } => "timeout",
        }
    }

    pub(crate) fn not_found(key: &str) -> Self {
        KbError::ArtifactNotFound {
            key: key.to_string(),
        }
    }

    pub(crate) fn corrupt(key: &str, reason: impl Into<String>) -> Self {
        KbError::ArtifactCorrupt {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result alias for core operations
pub type KbResult<T> = Result<T, KbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(KbError::not_found("x").kind(), "not_found");
        assert_eq!(KbError::corrupt("x", "bad").kind(), "corrupt");
        assert_eq!(KbError::InvalidState("busy".into()).kind(), "invalid_state");
    }

    #[test]
    fn test_display_includes_key() {
        let err = KbError::corrupt("controls", "missing 'entries'");
        assert_eq!(
            err.to_string(),
            "artifact 'controls' is corrupt: missing 'entries'"
        );
    }
}
