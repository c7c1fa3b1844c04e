//! Workflow registry.
//!
//! Workflows are registered as `(name, factory)` pairs while the process is
//! being configured. [`RegistryBuilder::build`] runs every factory once and
//! freezes the result; the [`WorkflowRegistry`] is read-only from then on.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tracing::debug;
use waypoint_workflow::{DefineWorkflow, Services, WorkflowDefinition, WorkflowError};

use crate::error::EngineError;

/// Builds a definition, with access to the shared services.
pub type WorkflowFactory =
  Box<dyn FnOnce(&Services) -> Result<WorkflowDefinition, WorkflowError> + Send>;

/// Read-only mapping from workflow name to definition.
#[derive(Clone, Default)]
pub struct WorkflowRegistry {
  workflows: HashMap<String, Arc<WorkflowDefinition>>,
}

impl WorkflowRegistry {
  pub fn builder() -> RegistryBuilder {
    RegistryBuilder::new()
  }

  /// Look up a definition by name.
  pub fn get(&self, name: &str) -> Option<Arc<WorkflowDefinition>> {
    self.workflows.get(name).cloned()
  }

  pub fn contains(&self, name: &str) -> bool {
    self.workflows.contains_key(name)
  }

  /// Registered names, sorted.
  pub fn names(&self) -> Vec<&str> {
    let mut names: Vec<&str> = self.workflows.keys().map(String::as_str).collect();
    names.sort_unstable();
    names
  }

  pub fn len(&self) -> usize {
    self.workflows.len()
  }

  pub fn is_empty(&self) -> bool {
    self.workflows.is_empty()
  }
}

impl fmt::Debug for WorkflowRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WorkflowRegistry")
      .field("workflows", &self.names())
      .finish()
  }
}

/// Collects workflow registrations.
#[derive(Default)]
pub struct RegistryBuilder {
  entries: Vec<(String, WorkflowFactory)>,
}

impl RegistryBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a workflow factory under `name`.
  pub fn add<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
  where
    F: FnOnce(&Services) -> Result<WorkflowDefinition, WorkflowError> + Send + 'static,
  {
    self.entries.push((name.into(), Box::new(factory)));
    self
  }

  /// Register an already built definition under its own name.
  pub fn add_definition(&mut self, definition: WorkflowDefinition) -> &mut Self {
    let name = definition.name().to_string();
    self.add(name, move |_| Ok(definition))
  }

  /// Register a workflow known by type.
  pub fn add_type<W: DefineWorkflow>(&mut self) -> &mut Self {
    self.add(W::NAME, |_| W::define())
  }

  /// Number of registrations collected so far.
  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Run every factory and freeze the registry.
  ///
  /// Names are checked before any factory runs: an empty or duplicated name
  /// fails the whole build.
  pub fn build(self, services: &Services) -> Result<WorkflowRegistry, EngineError> {
    let mut seen = HashSet::new();
    for (name, _) in &self.entries {
      if name.trim().is_empty() {
        return Err(WorkflowError::EmptyName.into());
      }
      if !seen.insert(name.as_str()) {
        return Err(EngineError::DuplicateWorkflow { name: name.clone() });
      }
    }

    let mut workflows = HashMap::with_capacity(self.entries.len());
    for (name, factory) in self.entries {
      let definition = factory(services)?;
      if definition.name() != name {
        return Err(EngineError::NameMismatch {
          registered: name,
          defined: definition.name().to_string(),
        });
      }
      debug!(workflow = %name, steps = definition.len(), "workflow_registered");
      workflows.insert(name, Arc::new(definition));
    }

    Ok(WorkflowRegistry { workflows })
  }
}

impl fmt::Debug for RegistryBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let names: Vec<&str> = self.entries.iter().map(|(name, _)| name.as_str()).collect();
    f.debug_struct("RegistryBuilder").field("entries", &names).finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use tokio_util::sync::CancellationToken;
  use waypoint_workflow::{Outcome, Step, WorkflowContext};

  struct Noop;

  #[async_trait]
  impl Step for Noop {
    async fn execute(&self, _ctx: &mut WorkflowContext, _cancel: &CancellationToken) -> Outcome {
      Outcome::Continue
    }
  }

  struct Hello;

  impl DefineWorkflow for Hello {
    const NAME: &'static str = "hello";

    fn define() -> Result<WorkflowDefinition, WorkflowError> {
      WorkflowDefinition::builder(Self::NAME).step(Noop).build()
    }
  }

  #[test]
  fn test_build_registers_all() {
    let mut builder = RegistryBuilder::new();
    builder
      .add_type::<Hello>()
      .add("two", |_| WorkflowDefinition::builder("two").step(Noop).step(Noop).build());

    let registry = builder.build(&Services::new()).unwrap();

    assert_eq!(registry.names(), vec!["hello", "two"]);
    assert_eq!(registry.get("two").unwrap().len(), 2);
    assert!(registry.get("missing").is_none());
  }

  #[test]
  fn test_duplicate_names_rejected() {
    let mut builder = RegistryBuilder::new();
    builder.add_type::<Hello>().add_type::<Hello>();

    let err = builder.build(&Services::new()).unwrap_err();
    assert!(matches!(err, EngineError::DuplicateWorkflow { ref name } if name == "hello"));
    assert!(err.is_configuration());
  }

  #[test]
  fn test_factory_errors_propagate() {
    let mut builder = RegistryBuilder::new();
    builder.add("dup_labels", |_| {
      WorkflowDefinition::builder("dup_labels")
        .label("a", Noop)
        .label("a", Noop)
        .build()
    });

    let err = builder.build(&Services::new()).unwrap_err();
    assert!(matches!(
      err,
      EngineError::Definition(WorkflowError::DuplicateLabel { .. })
    ));
  }

  #[test]
  fn test_name_mismatch_rejected() {
    let mut builder = RegistryBuilder::new();
    builder.add("alias", |_| Hello::define());

    let err = builder.build(&Services::new()).unwrap_err();
    assert!(matches!(err, EngineError::NameMismatch { .. }));
  }

  #[test]
  fn test_factories_see_services() {
    let services = Services::new().with(3usize);
    let mut builder = RegistryBuilder::new();
    builder.add("sized", |services| {
      let count = services.get::<usize>().copied().unwrap_or(0);
      let mut workflow = WorkflowDefinition::builder("sized");
      for _ in 0..count {
        workflow = workflow.step(Noop);
      }
      workflow.build()
    });

    let registry = builder.build(&services).unwrap();
    assert_eq!(registry.get("sized").unwrap().len(), 3);
  }
}
