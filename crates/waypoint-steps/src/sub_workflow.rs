//! Nested workflow steps.
//!
//! A sub-workflow runs as an instance of its own, started through the
//! [`RunnerHandle`] found in the parent context's services. The child
//! receives the parent's services and, unless a selector says otherwise, the
//! parent's input.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use waypoint_engine::{EngineError, InstanceStatus, RunRequest, RunnerHandle};
use waypoint_workflow::{DefineWorkflow, Outcome, Step, WorkflowContext};

use crate::branch::{Predicate, evaluate, predicate};
use crate::guard::guard;

/// Projects the parent context onto the child's input.
pub type InputSelector = Arc<dyn Fn(&WorkflowContext) -> Value + Send + Sync>;

/// Chooses the child's instance id.
pub type InstanceSelector = Arc<dyn Fn(&WorkflowContext) -> String + Send + Sync>;

/// Runs another workflow as a single step.
///
/// When waiting for the result (the default), the step finishes when the
/// child does: the child's output becomes this context's output and a child
/// failure becomes this step's failure, with the same cause. A child that
/// parks on a wait parks the parent too.
///
/// Without waiting, the child is started and the parent continues as soon as
/// the child first suspends or finishes.
#[derive(Clone)]
pub struct SubWorkflow {
  workflow: String,
  input: Option<InputSelector>,
  instance: Option<InstanceSelector>,
  wait_for_result: bool,
}

impl SubWorkflow {
  pub fn new(workflow: impl Into<String>) -> Self {
    Self {
      workflow: workflow.into(),
      input: None,
      instance: None,
      wait_for_result: true,
    }
  }

  /// Run a workflow known by type.
  pub fn of<W: DefineWorkflow>() -> Self {
    Self::new(W::NAME)
  }

  /// Give the child a projection of the parent context as input.
  pub fn select_input<F>(mut self, select: F) -> Self
  where
    F: Fn(&WorkflowContext) -> Value + Send + Sync + 'static,
  {
    self.input = Some(Arc::new(select));
    self
  }

  /// Derive the child's instance id from the parent context.
  ///
  /// A stable id lets a resumed parent continue the same child, and the
  /// parent's resume event is forwarded to it.
  pub fn instance_id<F>(mut self, select: F) -> Self
  where
    F: Fn(&WorkflowContext) -> String + Send + Sync + 'static,
  {
    self.instance = Some(Arc::new(select));
    self
  }

  pub fn wait_for_result(mut self, wait: bool) -> Self {
    self.wait_for_result = wait;
    self
  }

  pub fn workflow(&self) -> &str {
    &self.workflow
  }

  async fn launch(&self, ctx: &mut WorkflowContext, cancel: &CancellationToken) -> Outcome {
    let Some(runner) = ctx
      .services()
      .get::<RunnerHandle>()
      .and_then(RunnerHandle::runner)
    else {
      return Outcome::fail_msg(format!(
        "no workflow runner available to start '{}'",
        self.workflow
      ));
    };

    let input = match &self.input {
      Some(select) => match guard(|| select(ctx)) {
        Ok(input) => input,
        Err(error) => return Outcome::fail(error),
      },
      None => ctx.input().clone(),
    };

    let mut request = RunRequest::new(&self.workflow)
      .input(input)
      .services(ctx.services().clone())
      .wait_for_result(self.wait_for_result);

    if let Some(select) = &self.instance {
      match guard(|| select(ctx)) {
        Ok(instance_id) => request = request.instance(instance_id),
        Err(error) => return Outcome::fail(error),
      }
      if let Some(event) = ctx.event().cloned() {
        request = request.event(event);
      }
    }

    debug!(
      parent = %ctx.instance_id(),
      workflow = %self.workflow,
      wait_for_result = self.wait_for_result,
      "sub_workflow_started"
    );

    let result = match runner.run(request, cancel.clone()).await {
      Ok(result) => result,
      Err(EngineError::StepFailed(cause)) => return Outcome::Failure(cause.into_cause()),
      Err(error) => return Outcome::fail(error),
    };

    if !self.wait_for_result {
      return Outcome::Continue;
    }

    match result.status {
      InstanceStatus::Waiting => Outcome::wait(format!(
        "sub-workflow '{}' instance '{}' is waiting",
        self.workflow, result.instance_id
      )),
      _ => {
        if let Some(output) = result.output {
          ctx.set_output_value(output);
        }
        Outcome::Continue
      }
    }
  }
}

impl fmt::Debug for SubWorkflow {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SubWorkflow")
      .field("workflow", &self.workflow)
      .field("select_input", &self.input.is_some())
      .field("instance_id", &self.instance.is_some())
      .field("wait_for_result", &self.wait_for_result)
      .finish()
  }
}

#[async_trait]
impl Step for SubWorkflow {
  async fn execute(&self, ctx: &mut WorkflowContext, cancel: &CancellationToken) -> Outcome {
    self.launch(ctx, cancel).await
  }
}

/// Runs one of two workflows depending on a predicate.
///
/// Behaves like [`SubWorkflow`] for the chosen workflow. Without an
/// `otherwise` workflow a false predicate does nothing.
pub struct ConditionalSubWorkflow {
  predicate: Predicate,
  when_true: String,
  when_false: Option<String>,
  input: Option<InputSelector>,
  wait_for_result: bool,
}

impl ConditionalSubWorkflow {
  pub fn new<F>(predicate: F, when_true: impl Into<String>) -> Self
  where
    F: Fn(&WorkflowContext) -> bool + Send + Sync + 'static,
  {
    Self {
      predicate: self::predicate(predicate),
      when_true: when_true.into(),
      when_false: None,
      input: None,
      wait_for_result: true,
    }
  }

  /// Workflow to run when the predicate is false. A blank name is ignored.
  pub fn otherwise(mut self, when_false: impl Into<String>) -> Self {
    let when_false = when_false.into();
    self.when_false = (!when_false.trim().is_empty()).then_some(when_false);
    self
  }

  pub fn select_input<F>(mut self, select: F) -> Self
  where
    F: Fn(&WorkflowContext) -> Value + Send + Sync + 'static,
  {
    self.input = Some(Arc::new(select));
    self
  }

  pub fn wait_for_result(mut self, wait: bool) -> Self {
    self.wait_for_result = wait;
    self
  }
}

impl fmt::Debug for ConditionalSubWorkflow {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ConditionalSubWorkflow")
      .field("when_true", &self.when_true)
      .field("when_false", &self.when_false)
      .field("select_input", &self.input.is_some())
      .field("wait_for_result", &self.wait_for_result)
      .finish()
  }
}

#[async_trait]
impl Step for ConditionalSubWorkflow {
  async fn execute(&self, ctx: &mut WorkflowContext, cancel: &CancellationToken) -> Outcome {
    let selected = match evaluate(&self.predicate, ctx) {
      Ok(true) => Some(&self.when_true),
      Ok(false) => self.when_false.as_ref(),
      Err(error) => return Outcome::fail(error),
    };

    let Some(workflow) = selected else {
      return Outcome::Continue;
    };

    let step = SubWorkflow {
      workflow: workflow.clone(),
      input: self.input.clone(),
      instance: None,
      wait_for_result: self.wait_for_result,
    };
    step.launch(ctx, cancel).await
  }
}
