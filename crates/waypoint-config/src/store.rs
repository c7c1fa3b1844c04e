use serde::{Deserialize, Serialize};

use crate::ConfigError;

fn default_max_connections() -> u32 {
  5
}

/// Which persistence store the engine opens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
  /// Positions are kept in process memory and lost on exit.
  #[default]
  Memory,

  /// Positions are kept in a SQLite database.
  Sqlite {
    /// Connection URL, e.g. `sqlite://waypoint.db`.
    url: String,
    #[serde(default = "default_max_connections")]
    max_connections: u32,
  },
}

impl StoreConfig {
  pub fn validate(&self) -> Result<(), ConfigError> {
    match self {
      StoreConfig::Memory => Ok(()),
      StoreConfig::Sqlite {
        url,
        max_connections,
      } => {
        if url.trim().is_empty() {
          return Err(ConfigError::Invalid {
            message: "sqlite store url must not be empty".to_string(),
          });
        }
        if *max_connections == 0 {
          return Err(ConfigError::Invalid {
            message: "sqlite store max_connections must be at least 1".to_string(),
          });
        }
        Ok(())
      }
    }
  }
}
