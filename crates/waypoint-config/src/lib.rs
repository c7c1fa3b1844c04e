//! Waypoint Config
//!
//! This crate contains the serializable configuration of a waypoint engine:
//! which persistence store to open and how verbose logging should be.
//!
//! Configuration is read from JSON:
//!
//! ```json
//! {
//!   "store": { "type": "sqlite", "url": "sqlite://waypoint.db", "max_connections": 4 },
//!   "log_filter": "waypoint=debug,info"
//! }
//! ```
//!
//! Every field is optional. The defaults are an in-memory store and the
//! `info` log filter.

mod store;

pub use store::StoreConfig;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("failed to read config file {}: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid config JSON: {0}")]
  Parse(#[from] serde_json::Error),

  #[error("invalid config: {message}")]
  Invalid { message: String },
}

fn default_log_filter() -> String {
  "info".to_string()
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
  #[serde(default)]
  pub store: StoreConfig,

  /// `tracing` filter directives, used when `RUST_LOG` is not set.
  #[serde(default = "default_log_filter")]
  pub log_filter: String,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      store: StoreConfig::default(),
      log_filter: default_log_filter(),
    }
  }
}

impl EngineConfig {
  /// Parse and validate a JSON document.
  pub fn from_json(json: &str) -> Result<Self, ConfigError> {
    let config: Self = serde_json::from_str(json)?;
    config.validate()?;
    Ok(config)
  }

  /// Read, parse and validate a JSON file.
  pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let content = tokio::fs::read_to_string(path)
      .await
      .map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
      })?;
    Self::from_json(&content)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.log_filter.trim().is_empty() {
      return Err(ConfigError::Invalid {
        message: "log_filter must not be empty".to_string(),
      });
    }
    self.store.validate()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_document_uses_defaults() {
    let config = EngineConfig::from_json("{}").unwrap();
    assert_eq!(config, EngineConfig::default());
    assert_eq!(config.store, StoreConfig::Memory);
    assert_eq!(config.log_filter, "info");
  }

  #[test]
  fn test_sqlite_store() {
    let config = EngineConfig::from_json(
      r#"{
        "store": { "type": "sqlite", "url": "sqlite://flows.db" },
        "log_filter": "waypoint=debug"
      }"#,
    )
    .unwrap();

    assert_eq!(
      config.store,
      StoreConfig::Sqlite {
        url: "sqlite://flows.db".to_string(),
        max_connections: 5,
      }
    );
    assert_eq!(config.log_filter, "waypoint=debug");
  }

  #[test]
  fn test_unknown_fields_rejected() {
    let err = EngineConfig::from_json(r#"{ "stroe": { "type": "memory" } }"#).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
  }

  #[test]
  fn test_blank_log_filter_rejected() {
    let err = EngineConfig::from_json(r#"{ "log_filter": " " }"#).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { .. }));
  }

  #[tokio::test]
  async fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("waypoint.json");
    tokio::fs::write(&path, r#"{ "store": { "type": "memory" } }"#)
      .await
      .unwrap();

    let config = EngineConfig::load(&path).await.unwrap();
    assert_eq!(config.store, StoreConfig::Memory);
  }

  #[tokio::test]
  async fn test_missing_file() {
    let err = EngineConfig::load("/definitely/not/here.json").await.unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
    assert!(err.to_string().contains("/definitely/not/here.json"));
  }
}
