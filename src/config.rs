use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What the outward slicing notification carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlicingPayload {
    /// `{n, i}` for the slice, `{s}` when the slice has no record.
    #[default]
    InstanceIndex,
    /// The source path the slice was loaded from.
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Quiet period before a slicing notification is sent.
    pub debounce_ms: u64,
    pub slicing_payload: SlicingPayload,
    /// Minimum cosine between the slice axis and an LPS axis for a camera hint.
    pub obliquity_tolerance: f64,
    /// Compute per-slice pixel ranges after building volumes whose windowing differs.
    pub track_data_ranges: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 16,
            slicing_payload: SlicingPayload::default(),
            obliquity_tolerance: 0.8,
            track_data_ranges: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config = SyncConfig::from_json_str(r#"{"slicing_payload": "file"}"#).unwrap();
        assert_eq!(config.slicing_payload, SlicingPayload::File);
        assert_eq!(config.debounce(), Duration::from_millis(16));
        assert_eq!(config.obliquity_tolerance, 0.8);
    }

    #[test]
    fn reads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.json");
        fs::write(&path, r#"{"debounce_ms": 0, "track_data_ranges": false}"#).unwrap();

        let config = SyncConfig::from_path(&path).unwrap();
        assert_eq!(config.debounce(), Duration::ZERO);
        assert!(!config.track_data_ranges);
    }

    #[test]
    fn rejects_unknown_payloads() {
        assert!(matches!(
            SyncConfig::from_json_str(r#"{"slicing_payload": "pixels"}"#),
            Err(ConfigError::Json(_))
        ));
    }
}
