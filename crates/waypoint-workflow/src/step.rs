//! The step capability.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::context::WorkflowContext;
use crate::outcome::Outcome;

/// A unit of work inside a workflow definition.
///
/// Steps are shared by every instance of a definition, so they hold only
/// immutable configuration. Per-run state belongs in the [`WorkflowContext`].
///
/// Implementations are responsible for their own error containment: anything
/// that goes wrong inside `execute` should come back as [`Outcome::Failure`].
/// The dispatcher does not catch panics from steps it does not own.
#[async_trait]
pub trait Step: Send + Sync {
  /// Execute the step and produce exactly one outcome.
  async fn execute(&self, ctx: &mut WorkflowContext, cancel: &CancellationToken) -> Outcome;

  /// Label this step can be reached by with [`Outcome::Jump`].
  fn label(&self) -> Option<&str> {
    None
  }
}

#[async_trait]
impl<S> Step for Arc<S>
where
  S: Step + ?Sized,
{
  async fn execute(&self, ctx: &mut WorkflowContext, cancel: &CancellationToken) -> Outcome {
    (**self).execute(ctx, cancel).await
  }

  fn label(&self) -> Option<&str> {
    (**self).label()
  }
}

/// A step addressable by label.
///
/// Execution is delegated to the wrapped step unchanged.
pub struct NamedStep {
  name: String,
  inner: Arc<dyn Step>,
}

impl NamedStep {
  pub fn new(name: impl Into<String>, inner: impl Step + 'static) -> Self {
    Self {
      name: name.into(),
      inner: Arc::new(inner),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }
}

#[async_trait]
impl Step for NamedStep {
  async fn execute(&self, ctx: &mut WorkflowContext, cancel: &CancellationToken) -> Outcome {
    self.inner.execute(ctx, cancel).await
  }

  fn label(&self) -> Option<&str> {
    Some(&self.name)
  }
}
