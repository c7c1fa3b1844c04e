//! Waypoint Store
//!
//! This crate provides the persistence trait and implementations for
//! workflow instance positions. The whole durable footprint of an instance is
//! a [`WorkflowState`]: its id and the index of the step to execute next.
//!
//! The [`PersistenceStore`] trait defines two operations:
//! - Saving the position of an instance (last write wins)
//! - Loading the position of an instance, if one was ever saved

mod memory;
mod sqlite;
mod types;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use types::WorkflowState;

use async_trait::async_trait;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// A stored record could not be decoded.
  #[error("corrupt state for instance '{instance_id}': {message}")]
  Corrupt {
    instance_id: String,
    message: String,
  },

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  /// Applying schema migrations failed.
  #[error("migration error: {0}")]
  Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Durable mapping from instance id to resume position.
///
/// Implementations must be safe for concurrent use by many dispatch chains.
/// Each instance id has a single writer at a time, so last-write-wins
/// semantics are sufficient.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
  /// Save the position of an instance, replacing any previous one.
  async fn save(&self, state: &WorkflowState) -> Result<(), Error>;

  /// Load the position of an instance.
  async fn load(&self, instance_id: &str) -> Result<Option<WorkflowState>, Error>;
}
