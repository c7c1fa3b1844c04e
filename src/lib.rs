//! Waypoint
//!
//! A durable, step-based workflow runtime. Workflows are ordered lists of
//! steps; after every step the position of the instance is persisted so a
//! crashed or suspended instance resumes exactly where it left off.
//!
//! This crate wires the member crates together:
//!
//! - `waypoint-workflow`: steps, outcomes, definitions and per-instance context
//! - `waypoint-steps`: the step library (delay, log, code, branch, jump, ...)
//! - `waypoint-engine`: the dispatcher, runner, scheduler and event bus
//! - `waypoint-store`: in-memory and SQLite persistence
//! - `waypoint-config`: the JSON engine configuration
//!
//! ```ignore
//! let runner = Waypoint::new(EngineConfig::load("waypoint.json").await?)
//!   .add_type::<Payment>()
//!   .build()
//!   .await?;
//!
//! runner.run(RunRequest::of::<Payment>().wait(), CancellationToken::new()).await?;
//! ```

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

pub use waypoint_config::{ConfigError, EngineConfig, StoreConfig};
pub use waypoint_engine::{
  EngineError, EventBus, EventKind, InMemoryEventBus, InstanceStatus, RegistryBuilder, RunRequest,
  RunResult, Scheduler, TokioScheduler, WorkflowEvent, WorkflowRegistry, WorkflowRunner,
};
pub use waypoint_store::{InMemoryStore, PersistenceStore, SqliteStore};
pub use waypoint_workflow::{
  DefineWorkflow, Outcome, ResumeEvent, Services, Step, WorkflowContext, WorkflowDefinition,
  WorkflowError,
};

pub mod steps {
  pub use waypoint_steps::*;
}

/// Error type for assembling an engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error("failed to open store: {0}")]
  Store(#[from] waypoint_store::Error),

  #[error(transparent)]
  Engine(#[from] EngineError),
}

/// Builder that turns an [`EngineConfig`] and a set of workflows into a
/// ready [`WorkflowRunner`].
///
/// Collaborators that are not supplied explicitly are created from the
/// configuration: the store named by `config.store`, a [`TokioScheduler`] and
/// an [`InMemoryEventBus`].
pub struct Waypoint {
  config: EngineConfig,
  registry: RegistryBuilder,
  services: Services,
  store: Option<Arc<dyn PersistenceStore>>,
  scheduler: Option<Arc<dyn Scheduler>>,
  bus: Option<Arc<dyn EventBus>>,
}

impl Default for Waypoint {
  fn default() -> Self {
    Self::new(EngineConfig::default())
  }
}

impl Waypoint {
  pub fn new(config: EngineConfig) -> Self {
    Self {
      config,
      registry: RegistryBuilder::new(),
      services: Services::new(),
      store: None,
      scheduler: None,
      bus: None,
    }
  }

  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  /// Register a workflow factory under `name`.
  pub fn add_workflow<F>(mut self, name: impl Into<String>, factory: F) -> Self
  where
    F: FnOnce(&Services) -> Result<WorkflowDefinition, WorkflowError> + Send + 'static,
  {
    self.registry.add(name, factory);
    self
  }

  pub fn add_definition(mut self, definition: WorkflowDefinition) -> Self {
    self.registry.add_definition(definition);
    self
  }

  pub fn add_type<W: DefineWorkflow>(mut self) -> Self {
    self.registry.add_type::<W>();
    self
  }

  /// Make a capability available to workflow factories and to every step.
  pub fn service<T>(mut self, value: T) -> Self
  where
    T: Send + Sync + 'static,
  {
    self.services.insert(value);
    self
  }

  /// Use `store` instead of the one named by the configuration.
  pub fn store(mut self, store: Arc<dyn PersistenceStore>) -> Self {
    self.store = Some(store);
    self
  }

  pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
    self.scheduler = Some(scheduler);
    self
  }

  pub fn bus(mut self, bus: Arc<dyn EventBus>) -> Self {
    self.bus = Some(bus);
    self
  }

  /// Install the global fmt subscriber with the configured `log_filter` as
  /// the fallback for `RUST_LOG`.
  pub fn init_tracing(&self) -> Result<(), TryInitError> {
    init_tracing(&self.config.log_filter)
  }

  /// Validate the configuration, build the registry and open the store.
  pub async fn build(self) -> Result<WorkflowRunner, Error> {
    self.config.validate()?;

    let registry = self.registry.build(&self.services)?;

    let store = match self.store {
      Some(store) => store,
      None => open_store(&self.config.store).await?,
    };
    let scheduler = self
      .scheduler
      .unwrap_or_else(|| Arc::new(TokioScheduler::new()));
    let bus = self
      .bus
      .unwrap_or_else(|| Arc::new(InMemoryEventBus::new()));

    info!(
      workflows = registry.len(),
      store = store_kind(&self.config.store),
      "engine_ready"
    );

    Ok(WorkflowRunner::with_services(
      registry,
      store,
      scheduler,
      bus,
      self.services,
    ))
  }
}

async fn open_store(config: &StoreConfig) -> Result<Arc<dyn PersistenceStore>, waypoint_store::Error> {
  match config {
    StoreConfig::Memory => Ok(Arc::new(InMemoryStore::new())),
    StoreConfig::Sqlite {
      url,
      max_connections,
    } => Ok(Arc::new(SqliteStore::connect(url, *max_connections).await?)),
  }
}

fn store_kind(config: &StoreConfig) -> &'static str {
  match config {
    StoreConfig::Memory => "memory",
    StoreConfig::Sqlite { .. } => "sqlite",
  }
}

/// Install a global fmt subscriber.
///
/// `RUST_LOG` takes precedence; `filter` is used when it is unset or invalid.
/// Fails if a global subscriber is already installed.
pub fn init_tracing(filter: &str) -> Result<(), TryInitError> {
  tracing_subscriber::registry()
    .with(env_filter(filter))
    .with(tracing_subscriber::fmt::layer())
    .try_init()
}

fn env_filter(fallback: &str) -> EnvFilter {
  EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_default_builds_in_memory_runner() {
    let runner = Waypoint::default()
      .add_workflow("empty", |_| WorkflowDefinition::builder("empty").build())
      .build()
      .await
      .unwrap();

    assert!(runner.registry().contains("empty"));
  }

  #[tokio::test]
  async fn test_invalid_config_rejected_before_opening_store() {
    let config = EngineConfig {
      store: StoreConfig::Sqlite {
        url: String::new(),
        max_connections: 1,
      },
      ..EngineConfig::default()
    };

    let err = Waypoint::new(config).build().await.err().unwrap();
    assert!(matches!(err, Error::Config(ConfigError::Invalid { .. })));
  }

  #[test]
  fn test_init_tracing_uses_configured_filter() {
    let config = EngineConfig::from_json(r#"{ "log_filter": "waypoint=debug,warn" }"#).unwrap();
    let waypoint = Waypoint::new(config);

    if std::env::var_os("RUST_LOG").is_none() {
      let filter = env_filter(&waypoint.config().log_filter);
      assert_eq!(
        filter.max_level_hint(),
        Some(tracing_subscriber::filter::LevelFilter::DEBUG)
      );
    }

    waypoint.init_tracing().unwrap();
    assert!(waypoint.init_tracing().is_err());
    tracing::debug!(target: "waypoint", "tracing installed");
  }

  #[tokio::test]
  async fn test_duplicate_workflow_is_engine_error() {
    let err = Waypoint::default()
      .add_workflow("twice", |_| WorkflowDefinition::builder("twice").build())
      .add_workflow("twice", |_| WorkflowDefinition::builder("twice").build())
      .build()
      .await
      .err()
      .unwrap();

    assert!(matches!(
      err,
      Error::Engine(EngineError::DuplicateWorkflow { .. })
    ));
  }
}
