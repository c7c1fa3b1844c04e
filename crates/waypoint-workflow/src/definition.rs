//! Workflow definitions.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::WorkflowError;
use crate::step::{NamedStep, Step};

/// A named, ordered and immutable sequence of steps.
///
/// The label index is built once, when the definition is constructed.
/// Labels must be unique within a definition.
pub struct WorkflowDefinition {
  name: String,
  steps: Vec<Arc<dyn Step>>,
  labels: HashMap<String, usize>,
}

impl WorkflowDefinition {
  /// Create a definition from its steps, validating labels.
  pub fn new(name: impl Into<String>, steps: Vec<Arc<dyn Step>>) -> Result<Self, WorkflowError> {
    let name = name.into();
    if name.trim().is_empty() {
      return Err(WorkflowError::EmptyName);
    }

    let mut labels: HashMap<String, usize> = HashMap::new();
    for (index, step) in steps.iter().enumerate() {
      let Some(label) = step.label() else {
        continue;
      };
      if label.is_empty() {
        return Err(WorkflowError::EmptyLabel { workflow: name });
      }
      if let Some(first) = labels.get(label) {
        return Err(WorkflowError::DuplicateLabel {
          workflow: name.clone(),
          label: label.to_string(),
          first: *first,
          second: index,
        });
      }
      labels.insert(label.to_string(), index);
    }

    Ok(Self {
      name,
      steps,
      labels,
    })
  }

  /// Start building a definition step by step.
  pub fn builder(name: impl Into<String>) -> WorkflowBuilder {
    WorkflowBuilder {
      name: name.into(),
      steps: Vec::new(),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn steps(&self) -> &[Arc<dyn Step>] {
    &self.steps
  }

  pub fn step(&self, index: usize) -> Option<&Arc<dyn Step>> {
    self.steps.get(index)
  }

  pub fn len(&self) -> usize {
    self.steps.len()
  }

  pub fn is_empty(&self) -> bool {
    self.steps.is_empty()
  }

  /// Resolve a jump label to the index of the step carrying it.
  pub fn label_index(&self, label: &str) -> Option<usize> {
    self.labels.get(label).copied()
  }

  pub fn labels(&self) -> impl Iterator<Item = (&str, usize)> {
    self.labels.iter().map(|(label, index)| (label.as_str(), *index))
  }
}

impl fmt::Debug for WorkflowDefinition {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WorkflowDefinition")
      .field("name", &self.name)
      .field("steps", &self.steps.len())
      .field("labels", &self.labels)
      .finish()
  }
}

/// Incremental construction of a [`WorkflowDefinition`].
pub struct WorkflowBuilder {
  name: String,
  steps: Vec<Arc<dyn Step>>,
}

impl WorkflowBuilder {
  /// Append a step.
  pub fn step(mut self, step: impl Step + 'static) -> Self {
    self.steps.push(Arc::new(step));
    self
  }

  /// Append a step reachable by `label`.
  pub fn label(self, label: impl Into<String>, step: impl Step + 'static) -> Self {
    self.step(NamedStep::new(label, step))
  }

  pub fn build(self) -> Result<WorkflowDefinition, WorkflowError> {
    WorkflowDefinition::new(self.name, self.steps)
  }
}

/// A workflow known by type.
///
/// Implement this to register and run a workflow without repeating its name.
pub trait DefineWorkflow {
  const NAME: &'static str;

  fn define() -> Result<WorkflowDefinition, WorkflowError>;
}
