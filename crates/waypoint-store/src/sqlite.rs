use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::debug;

use crate::{Error, PersistenceStore, WorkflowState};

/// SQLite-based store implementation.
///
/// Positions survive process restarts, which is what lets an instance resume
/// from its last persisted step.
#[derive(Debug, Clone)]
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open a pool for `url`, creating the database file if needed, and run
  /// migrations.
  pub async fn connect(url: &str, max_connections: u32) -> Result<Self, Error> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
      .max_connections(max_connections.max(1))
      .connect_with(options)
      .await?;

    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), Error> {
    sqlx::migrate!("../../migrations").run(&self.pool).await?;
    Ok(())
  }

  pub fn pool(&self) -> &SqlitePool {
    &self.pool
  }
}

#[async_trait]
impl PersistenceStore for SqliteStore {
  async fn save(&self, state: &WorkflowState) -> Result<(), Error> {
    let next_step = i64::try_from(state.next_step).map_err(|_| Error::Corrupt {
      instance_id: state.instance_id.clone(),
      message: format!("step index {} does not fit in a database integer", state.next_step),
    })?;

    sqlx::query(
      r#"
            INSERT INTO workflow_states (instance_id, next_step, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(instance_id) DO UPDATE SET
                next_step = excluded.next_step,
                updated_at = excluded.updated_at
            "#,
    )
    .bind(&state.instance_id)
    .bind(next_step)
    .bind(state.updated_at)
    .execute(&self.pool)
    .await?;

    debug!(instance_id = %state.instance_id, next_step = state.next_step, "state_saved");
    Ok(())
  }

  async fn load(&self, instance_id: &str) -> Result<Option<WorkflowState>, Error> {
    let row = sqlx::query(
      r#"
            SELECT instance_id, next_step, updated_at
            FROM workflow_states
            WHERE instance_id = ?
            "#,
    )
    .bind(instance_id)
    .fetch_optional(&self.pool)
    .await?;

    let Some(row) = row else {
      return Ok(None);
    };

    let next_step: i64 = row.try_get("next_step")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;
    let next_step = usize::try_from(next_step).map_err(|_| Error::Corrupt {
      instance_id: instance_id.to_string(),
      message: format!("negative step index {}", next_step),
    })?;

    Ok(Some(WorkflowState {
      instance_id: row.try_get("instance_id")?,
      next_step,
      updated_at,
    }))
  }
}
