//! Checkpoint metadata written next to each persisted blob.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Describes the blob stored under `key` after a tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointManifest {
    pub key: String,
    pub tick: u64,
    pub saved_at: DateTime<Utc>,
    pub size: u64,
    /// Hex SHA-256 of the blob bytes.
    pub sha256: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_serde_roundtrip() {
        let manifest = CheckpointManifest {
            key: "forest".into(),
            tick: 42,
            saved_at: Utc::now(),
            size: 128,
            sha256: "ab".repeat(32),
        };
        let json = serde_json::to_string(&manifest).unwrap();
        let back: CheckpointManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, manifest);
    }
}
