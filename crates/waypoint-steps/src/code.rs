use std::fmt;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use waypoint_workflow::{Outcome, Step, WorkflowContext};

use crate::guard::guard_async;

type Body = Box<
  dyn for<'a> Fn(&'a mut WorkflowContext, &'a CancellationToken) -> BoxFuture<'a, anyhow::Result<Outcome>>
    + Send
    + Sync,
>;

/// Runs caller-supplied code as a step.
///
/// Errors returned by the body and panics raised while it runs both become
/// [`Outcome::Failure`].
///
/// ```ignore
/// let charge = Code::new(|ctx, _cancel| {
///   async move {
///     let order: Order = ctx.input_as()?;
///     ctx.set_output(&payments.charge(order).await?)?;
///     Ok(Outcome::Continue)
///   }
///   .boxed()
/// });
/// ```
pub struct Code {
  body: Body,
}

impl Code {
  /// Run an async body that decides the outcome.
  pub fn new<F>(body: F) -> Self
  where
    F: for<'a> Fn(&'a mut WorkflowContext, &'a CancellationToken) -> BoxFuture<'a, anyhow::Result<Outcome>>
      + Send
      + Sync
      + 'static,
  {
    Self {
      body: Box::new(body),
    }
  }

  /// Run an async body; completing without error continues.
  pub fn run<F>(body: F) -> Self
  where
    F: for<'a> Fn(&'a mut WorkflowContext, &'a CancellationToken) -> BoxFuture<'a, anyhow::Result<()>>
      + Send
      + Sync
      + 'static,
  {
    Self::new(move |ctx, cancel| body(ctx, cancel).map(|result| result.map(|()| Outcome::Continue)).boxed())
  }

  /// Run a synchronous action; returning without error continues.
  pub fn action<F>(action: F) -> Self
  where
    F: Fn(&mut WorkflowContext) -> anyhow::Result<()> + Send + Sync + 'static,
  {
    Self::new(move |ctx, _cancel| {
      let result = action(ctx).map(|()| Outcome::Continue);
      futures::future::ready(result).boxed()
    })
  }

  /// Run a synchronous function that decides the outcome.
  pub fn outcome<F>(decide: F) -> Self
  where
    F: Fn(&mut WorkflowContext) -> Outcome + Send + Sync + 'static,
  {
    Self::new(move |ctx, _cancel| futures::future::ready(Ok(decide(ctx))).boxed())
  }
}

impl fmt::Debug for Code {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Code").finish_non_exhaustive()
  }
}

#[async_trait]
impl Step for Code {
  async fn execute(&self, ctx: &mut WorkflowContext, cancel: &CancellationToken) -> Outcome {
    match guard_async(async { (self.body)(ctx, cancel).await }).await {
      Ok(Ok(outcome)) => outcome,
      Ok(Err(error)) => Outcome::fail(error),
      Err(panic) => Outcome::fail(panic),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::time::Duration;
  use waypoint_workflow::Services;

  #[derive(Debug, thiserror::Error)]
  #[error("ledger unavailable")]
  struct LedgerDown;

  fn ctx() -> WorkflowContext {
    WorkflowContext::new("i", "w", Services::new())
  }

  #[tokio::test]
  async fn test_async_body_decides_outcome() {
    let step = Code::new(|ctx, _cancel| {
      async move {
        tokio::time::sleep(Duration::from_millis(1)).await;
        ctx.set_item("charged", json!(true));
        Ok(Outcome::jump("receipt"))
      }
      .boxed()
    });
    let mut ctx = ctx();

    let outcome = step.execute(&mut ctx, &CancellationToken::new()).await;

    assert!(matches!(outcome, Outcome::Jump { ref label } if label == "receipt"));
    assert!(ctx.flag("charged"));
  }

  #[tokio::test]
  async fn test_error_becomes_failure_with_original_cause() {
    let step = Code::action(|_ctx| Err(LedgerDown.into()));

    let outcome = step.execute(&mut ctx(), &CancellationToken::new()).await;

    let Outcome::Failure(cause) = outcome else {
      panic!("expected failure");
    };
    assert!(cause.downcast_ref::<LedgerDown>().is_some());
  }

  #[tokio::test]
  async fn test_panic_becomes_failure() {
    let step = Code::action(|_ctx| panic!("index out of range"));

    let outcome = step.execute(&mut ctx(), &CancellationToken::new()).await;

    let Outcome::Failure(cause) = outcome else {
      panic!("expected failure");
    };
    assert!(cause.to_string().contains("index out of range"));
  }

  #[tokio::test]
  async fn test_run_continues_on_success() {
    let step = Code::run(|ctx, _cancel| {
      async move {
        ctx.set_output_value(json!("done"));
        Ok(())
      }
      .boxed()
    });
    let mut ctx = ctx();

    let outcome = step.execute(&mut ctx, &CancellationToken::new()).await;

    assert!(matches!(outcome, Outcome::Continue));
    assert_eq!(ctx.output(), Some(&json!("done")));
  }

  #[tokio::test]
  async fn test_outcome_form() {
    let step = Code::outcome(|ctx| {
      if ctx.flag("ready") {
        Outcome::Continue
      } else {
        Outcome::wait("not ready")
      }
    });

    let outcome = step.execute(&mut ctx(), &CancellationToken::new()).await;
    assert!(matches!(outcome, Outcome::Wait { .. }));
  }
}
