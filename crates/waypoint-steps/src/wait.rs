use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use waypoint_workflow::{Outcome, Step, WorkflowContext};

/// Parks the instance until a named event is delivered.
///
/// On resume with a matching [`ResumeEvent`](waypoint_workflow::ResumeEvent)
/// the event is consumed, its payload stored in the items under `key` (the
/// event name by default) and the instance continues.
#[derive(Debug, Clone)]
pub struct WaitForEvent {
  event: String,
  key: String,
}

impl WaitForEvent {
  pub fn new(event: impl Into<String>) -> Self {
    let event = event.into();
    Self {
      key: event.clone(),
      event,
    }
  }

  /// Store the payload under `key` instead of the event name.
  pub fn store_as(mut self, key: impl Into<String>) -> Self {
    self.key = key.into();
    self
  }
}

#[async_trait]
impl Step for WaitForEvent {
  async fn execute(&self, ctx: &mut WorkflowContext, _cancel: &CancellationToken) -> Outcome {
    match ctx.take_event(&self.event) {
      Some(event) => {
        ctx.set_item(self.key.clone(), event.payload);
        Outcome::Continue
      }
      None => Outcome::wait(format!("waiting for event '{}'", self.event)),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use waypoint_workflow::{ResumeEvent, Services};

  #[tokio::test]
  async fn test_waits_without_event() {
    let mut ctx = WorkflowContext::new("i", "w", Services::new());
    let outcome = WaitForEvent::new("approved")
      .execute(&mut ctx, &CancellationToken::new())
      .await;

    match outcome {
      Outcome::Wait { message } => assert_eq!(message, "waiting for event 'approved'"),
      other => panic!("unexpected outcome: {other:?}"),
    }
  }

  #[tokio::test]
  async fn test_ignores_other_events() {
    let mut ctx = WorkflowContext::new("i", "w", Services::new());
    ctx.deliver_event(ResumeEvent::new("rejected", json!(null)));

    let outcome = WaitForEvent::new("approved")
      .execute(&mut ctx, &CancellationToken::new())
      .await;

    assert!(matches!(outcome, Outcome::Wait { .. }));
    assert!(ctx.event().is_some());
  }

  #[tokio::test]
  async fn test_consumes_matching_event() {
    let mut ctx = WorkflowContext::new("i", "w", Services::new());
    ctx.deliver_event(ResumeEvent::new("approved", json!({ "by": "ops" })));

    let outcome = WaitForEvent::new("approved")
      .store_as("approval")
      .execute(&mut ctx, &CancellationToken::new())
      .await;

    assert!(matches!(outcome, Outcome::Continue));
    assert_eq!(ctx.item("approval"), Some(&json!({ "by": "ops" })));
    assert!(ctx.event().is_none());
  }
}
