//! Engine configuration, deserialized from JSON with per-field defaults so
//! a partial (or absent) config file is always valid.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse failed: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Broadcast channel capacity for the event bus.
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,

    /// Form context used when the caller does not name one.
    #[serde(default = "default_form_context")]
    pub default_form_context: String,

    /// Upper bound on a single metadata fetch.
    #[serde(default = "default_fetch_timeout", with = "duration_ms")]
    pub metadata_fetch_timeout: Duration,
}

impl EngineConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_str(&raw)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: default_event_buffer_size(),
            default_form_context: default_form_context(),
            metadata_fetch_timeout: default_fetch_timeout(),
        }
    }
}

fn default_event_buffer_size() -> usize {
    256
}

fn default_form_context() -> String {
    "default".to_string()
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(10)
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_object_uses_defaults() {
        let config = EngineConfig::from_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.event_buffer_size, 256);
        assert_eq!(config.default_form_context, "default");
        assert_eq!(config.metadata_fetch_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_duration_is_milliseconds() {
        let config =
            EngineConfig::from_str(r#"{"metadataFetchTimeout": 1500}"#).unwrap();
        assert_eq!(config.metadata_fetch_timeout, Duration::from_millis(1500));

        let out = serde_json::to_string(&config).unwrap();
        assert!(out.contains("\"metadataFetchTimeout\":1500"));
    }

    #[test]
    fn test_invalid_json_is_a_parse_error() {
        assert!(matches!(
            EngineConfig::from_str("not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
