use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use waypoint_workflow::{Outcome, Step, WorkflowContext};

use crate::guard::{guard, guard_async};

/// Decides between two paths from the context.
pub type Predicate = Arc<dyn Fn(&WorkflowContext) -> anyhow::Result<bool> + Send + Sync>;

pub(crate) fn predicate<F>(f: F) -> Predicate
where
  F: Fn(&WorkflowContext) -> bool + Send + Sync + 'static,
{
  Arc::new(move |ctx: &WorkflowContext| Ok(f(ctx)))
}

/// Evaluate `predicate`, containing errors and panics.
pub(crate) fn evaluate(predicate: &Predicate, ctx: &WorkflowContext) -> anyhow::Result<bool> {
  guard(|| predicate(ctx))?
}

/// Runs one of two steps depending on a predicate.
///
/// With no `otherwise` step a false predicate simply continues. The chosen
/// step's outcome is returned unchanged, so a branch can delay, wait or jump.
pub struct Branch {
  predicate: Predicate,
  when_true: Arc<dyn Step>,
  when_false: Option<Arc<dyn Step>>,
}

impl Branch {
  pub fn new<F>(predicate: F, when_true: impl Step + 'static) -> Self
  where
    F: Fn(&WorkflowContext) -> bool + Send + Sync + 'static,
  {
    Self {
      predicate: self::predicate(predicate),
      when_true: Arc::new(when_true),
      when_false: None,
    }
  }

  /// Like [`Branch::new`], for predicates that can fail.
  pub fn try_new<F>(predicate: F, when_true: impl Step + 'static) -> Self
  where
    F: Fn(&WorkflowContext) -> anyhow::Result<bool> + Send + Sync + 'static,
  {
    Self {
      predicate: Arc::new(predicate),
      when_true: Arc::new(when_true),
      when_false: None,
    }
  }

  /// Step to run when the predicate is false.
  pub fn otherwise(mut self, when_false: impl Step + 'static) -> Self {
    self.when_false = Some(Arc::new(when_false));
    self
  }
}

impl fmt::Debug for Branch {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Branch")
      .field("otherwise", &self.when_false.is_some())
      .finish_non_exhaustive()
  }
}

#[async_trait]
impl Step for Branch {
  async fn execute(&self, ctx: &mut WorkflowContext, cancel: &CancellationToken) -> Outcome {
    let chosen = match evaluate(&self.predicate, ctx) {
      Ok(true) => Some(&self.when_true),
      Ok(false) => self.when_false.as_ref(),
      Err(error) => return Outcome::fail(error),
    };

    let Some(step) = chosen else {
      return Outcome::Continue;
    };

    match guard_async(step.execute(ctx, cancel)).await {
      Ok(outcome) => outcome,
      Err(panic) => Outcome::fail(panic),
    }
  }
}
