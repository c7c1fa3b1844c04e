use std::fmt;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use waypoint_workflow::{NamedStep, Outcome, Step, WorkflowContext};

use crate::branch::{Predicate, evaluate, predicate};

/// Make `step` reachable by `name`.
pub fn label(name: impl Into<String>, step: impl Step + 'static) -> NamedStep {
  NamedStep::new(name, step)
}

/// Transfers control to a labelled step.
///
/// Either unconditionally, or to one of two labels chosen by a predicate.
pub struct Jump {
  predicate: Option<Predicate>,
  if_true: String,
  if_false: String,
}

impl Jump {
  pub fn to(label: impl Into<String>) -> Self {
    Self {
      predicate: None,
      if_true: label.into(),
      if_false: String::new(),
    }
  }

  /// Jump to `if_true` when the predicate holds, else to `if_false`.
  pub fn when<F>(predicate: F, if_true: impl Into<String>, if_false: impl Into<String>) -> Self
  where
    F: Fn(&WorkflowContext) -> bool + Send + Sync + 'static,
  {
    Self {
      predicate: Some(self::predicate(predicate)),
      if_true: if_true.into(),
      if_false: if_false.into(),
    }
  }
}

impl fmt::Debug for Jump {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Jump")
      .field("conditional", &self.predicate.is_some())
      .field("if_true", &self.if_true)
      .field("if_false", &self.if_false)
      .finish()
  }
}

#[async_trait]
impl Step for Jump {
  async fn execute(&self, ctx: &mut WorkflowContext, _cancel: &CancellationToken) -> Outcome {
    let Some(predicate) = &self.predicate else {
      return Outcome::jump(&self.if_true);
    };

    match evaluate(predicate, ctx) {
      Ok(true) => Outcome::jump(&self.if_true),
      Ok(false) => Outcome::jump(&self.if_false),
      Err(error) => Outcome::fail(error),
    }
  }
}
