//! Engine errors.

use std::fmt;
use std::ops::Deref;

use waypoint_workflow::{Cause, WorkflowError};

use crate::events::BusError;
use crate::scheduler::SchedulerError;

/// Errors that can occur while running workflows.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  /// No workflow is registered under this name.
  #[error("workflow '{name}' not found")]
  WorkflowNotFound { name: String },

  /// Resume was requested for an instance with no persisted position.
  #[error("instance '{instance_id}' not found")]
  InstanceNotFound { instance_id: String },

  /// A step jumped to a label its definition does not contain.
  #[error("unknown jump label '{label}' in workflow '{workflow}'")]
  UnknownLabel { workflow: String, label: String },

  /// Two workflows were registered under the same name.
  #[error("duplicate workflow name '{name}'")]
  DuplicateWorkflow { name: String },

  /// A factory produced a definition under a different name than it was
  /// registered with.
  #[error("workflow registered as '{registered}' defines '{defined}'")]
  NameMismatch { registered: String, defined: String },

  /// A workflow definition could not be built.
  #[error("invalid workflow definition: {0}")]
  Definition(#[from] WorkflowError),

  /// A step returned a failure. The cause is passed through unchanged.
  #[error(transparent)]
  StepFailed(StepCause),

  /// The persistence store failed.
  #[error("store error: {0}")]
  Store(#[from] waypoint_store::Error),

  /// The scheduler failed.
  #[error("scheduler error: {0}")]
  Scheduler(#[from] SchedulerError),

  /// The event bus failed.
  #[error("event bus error: {0}")]
  Bus(#[from] BusError),

  /// Execution was cancelled.
  #[error("execution cancelled")]
  Cancelled,
}

impl EngineError {
  /// The step failure cause, if this error is one.
  pub fn cause(&self) -> Option<&Cause> {
    match self {
      EngineError::StepFailed(cause) => Some(cause.cause()),
      _ => None,
    }
  }

  /// Configuration errors are never worth retrying.
  pub fn is_configuration(&self) -> bool {
    matches!(
      self,
      EngineError::WorkflowNotFound { .. }
        | EngineError::UnknownLabel { .. }
        | EngineError::DuplicateWorkflow { .. }
        | EngineError::NameMismatch { .. }
        | EngineError::Definition(_)
    )
  }
}

/// The cause carried by [`EngineError::StepFailed`].
///
/// Derefs to the shared [`Cause`], so `downcast_ref` reaches the error the
/// step failed with. As a [`std::error::Error`] its source is that error.
#[derive(Debug, Clone)]
pub struct StepCause(Cause);

impl StepCause {
  pub fn cause(&self) -> &Cause {
    &self.0
  }

  pub fn into_cause(self) -> Cause {
    self.0
  }
}

impl From<Cause> for StepCause {
  fn from(cause: Cause) -> Self {
    Self(cause)
  }
}

impl Deref for StepCause {
  type Target = Cause;

  fn deref(&self) -> &Cause {
    &self.0
  }
}

impl fmt::Display for StepCause {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Display::fmt(&*self.0, f)
  }
}

impl std::error::Error for StepCause {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    let error: &(dyn std::error::Error + Send + Sync + 'static) = (*self.0).as_ref();
    Some(error)
  }
}
