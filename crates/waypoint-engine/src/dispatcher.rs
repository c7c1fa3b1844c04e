//! The step dispatcher.
//!
//! Drives one instance through its definition, one step at a time. Each step's
//! [`Outcome`] decides what happens next:
//!
//! | Outcome    | Persisted index | Then                                     |
//! |------------|-----------------|------------------------------------------|
//! | `Continue` | `i + 1`         | run step `i + 1`                         |
//! | `Jump`     | label index `j` | run step `j`                             |
//! | `Delay`    | `i + 1`         | schedule step `i + 1`, return            |
//! | `Wait`     | `i`             | publish, return                          |
//! | `Failure`  | unchanged       | resolve the caller with the cause, publish |
//!
//! Running past the last step completes the instance. The next index is always
//! persisted before the next step runs, so a crash at any point resumes from a
//! step that has not yet completed.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use waypoint_store::{PersistenceStore, WorkflowState};
use waypoint_workflow::{Outcome, WorkflowContext, WorkflowDefinition};

use crate::error::EngineError;
use crate::events::{EventBus, WorkflowEvent};
use crate::runner::{InstanceStatus, RunResult};
use crate::scheduler::{ScheduleHandle, ScheduledCallback, Scheduler};

/// What a waiting caller eventually receives.
pub type Settlement = Result<RunResult, EngineError>;

/// One-shot channel back to a caller waiting for an instance to settle.
///
/// Consumed on use, so it resolves at most once.
pub struct Completion {
  sender: oneshot::Sender<Settlement>,
}

impl Completion {
  pub fn channel() -> (Self, oneshot::Receiver<Settlement>) {
    let (sender, receiver) = oneshot::channel();
    (Self { sender }, receiver)
  }

  pub fn resolve(self, settlement: Settlement) {
    // The caller may have stopped listening.
    let _ = self.sender.send(settlement);
  }
}

impl fmt::Debug for Completion {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Completion")
      .field("closed", &self.sender.is_closed())
      .finish()
  }
}

/// A running instance: its definition, its context and, if someone is
/// waiting for it, the completion to resolve.
#[derive(Debug)]
pub struct Instance {
  definition: Arc<WorkflowDefinition>,
  context: WorkflowContext,
  completion: Option<Completion>,
}

impl Instance {
  pub fn new(definition: Arc<WorkflowDefinition>, context: WorkflowContext) -> Self {
    Self {
      definition,
      context,
      completion: None,
    }
  }

  pub fn with_completion(mut self, completion: Completion) -> Self {
    self.completion = Some(completion);
    self
  }

  pub fn definition(&self) -> &WorkflowDefinition {
    &self.definition
  }

  pub fn context(&self) -> &WorkflowContext {
    &self.context
  }

  fn instance_id(&self) -> &str {
    self.context.instance_id()
  }

  fn workflow(&self) -> &str {
    self.definition.name()
  }

  fn settle(&mut self, settlement: Settlement) {
    if let Some(completion) = self.completion.take() {
      completion.resolve(settlement);
    }
  }
}

/// An error that stopped a dispatch chain, with the completion it still owes.
struct Halt {
  error: EngineError,
  completion: Option<Completion>,
}

impl Halt {
  fn resolve(self) {
    if let Some(completion) = self.completion {
      completion.resolve(Err(self.error));
    }
  }
}

enum Transition {
  /// Run the step at this index next.
  Next(usize),
  /// Persisted and published; schedule the step at `next`.
  Delay { next: usize, resume_at: DateTime<Utc> },
  /// The chain ends here.
  Settled(RunResult),
}

/// Executes steps and drives the per-instance state machine.
///
/// Shared by every instance. Dispatch chains for different instances run
/// independently; a single instance must only ever have one chain.
pub struct StepDispatcher {
  store: Arc<dyn PersistenceStore>,
  scheduler: Arc<dyn Scheduler>,
  bus: Arc<dyn EventBus>,
  pending: Mutex<HashMap<String, (u64, ScheduleHandle)>>,
  next_delay: AtomicU64,
}

impl StepDispatcher {
  pub fn new(
    store: Arc<dyn PersistenceStore>,
    scheduler: Arc<dyn Scheduler>,
    bus: Arc<dyn EventBus>,
  ) -> Self {
    Self {
      store,
      scheduler,
      bus,
      pending: Mutex::new(HashMap::new()),
      next_delay: AtomicU64::new(0),
    }
  }

  pub fn store(&self) -> &Arc<dyn PersistenceStore> {
    &self.store
  }

  pub fn bus(&self) -> &Arc<dyn EventBus> {
    &self.bus
  }

  /// Run `instance` from step `start` until it completes, fails or suspends.
  ///
  /// A delayed instance continues on the scheduler later; its completion, if
  /// any, travels with it.
  pub async fn dispatch(
    self: &Arc<Self>,
    instance: Instance,
    start: usize,
    cancel: &CancellationToken,
  ) -> Result<RunResult, EngineError> {
    self
      .drive(instance, start, cancel)
      .await
      .map_err(|halt| halt.error)
  }

  /// Cancel the pending delay of an instance, if it has one.
  ///
  /// The persisted index is left untouched, so resuming the instance later
  /// continues with the step after the delay.
  pub fn cancel_delay(&self, instance_id: &str) -> bool {
    let removed = self.pending.lock().unwrap().remove(instance_id);
    match removed {
      Some((_, handle)) => {
        handle.cancel();
        info!(instance_id = %instance_id, "delay_cancelled");
        true
      }
      None => false,
    }
  }

  /// Whether the instance is waiting on a scheduled continuation.
  pub fn has_pending_delay(&self, instance_id: &str) -> bool {
    self.pending.lock().unwrap().contains_key(instance_id)
  }

  #[instrument(
    name = "workflow_dispatch",
    skip_all,
    fields(
      workflow = %instance.workflow(),
      instance_id = %instance.instance_id(),
      start = start,
    )
  )]
  async fn drive(
    self: &Arc<Self>,
    mut instance: Instance,
    start: usize,
    cancel: &CancellationToken,
  ) -> Result<RunResult, Halt> {
    let mut index = start;
    loop {
      let transition = match self.advance(&mut instance, index, cancel).await {
        Ok(transition) => transition,
        Err(error) => {
          return Err(Halt {
            error,
            completion: instance.completion.take(),
          });
        }
      };

      match transition {
        Transition::Next(next) => index = next,
        Transition::Settled(result) => return Ok(result),
        Transition::Delay { next, resume_at } => {
          return self.suspend(instance, next, resume_at, cancel).await;
        }
      }
    }
  }

  /// Execute the step at `index` and act on its outcome.
  async fn advance(
    &self,
    instance: &mut Instance,
    index: usize,
    cancel: &CancellationToken,
  ) -> Result<Transition, EngineError> {
    let definition = Arc::clone(&instance.definition);
    let Some(step) = definition.step(index) else {
      return self.complete(instance).await;
    };

    let outcome = tokio::select! {
      biased;
      _ = cancel.cancelled() => {
        warn!(instance_id = %instance.instance_id(), step_index = index, "step cancelled");
        return Err(EngineError::Cancelled);
      }
      outcome = step.execute(&mut instance.context, cancel) => outcome,
    };

    info!(
      instance_id = %instance.instance_id(),
      step_index = index,
      outcome = outcome.kind(),
      "step_completed"
    );

    match outcome {
      Outcome::Continue => {
        self.persist(instance.instance_id(), index + 1).await?;
        Ok(Transition::Next(index + 1))
      }

      Outcome::Jump { label } => {
        let target = definition
          .label_index(&label)
          .ok_or_else(|| EngineError::UnknownLabel {
            workflow: definition.name().to_string(),
            label: label.clone(),
          })?;
        debug!(instance_id = %instance.instance_id(), label = %label, step_index = target, "jump");
        self.persist(instance.instance_id(), target).await?;
        Ok(Transition::Next(target))
      }

      Outcome::Delay { duration } => {
        let next = index + 1;
        let resume_at = resume_at(duration);
        self.persist(instance.instance_id(), next).await?;
        self
          .bus
          .publish(WorkflowEvent::Delayed {
            instance_id: instance.instance_id().to_string(),
            workflow: instance.workflow().to_string(),
            next_step: next,
            resume_at,
          })
          .await?;
        info!(
          instance_id = %instance.instance_id(),
          next_step = next,
          resume_at = %resume_at,
          "workflow_delayed"
        );
        Ok(Transition::Delay { next, resume_at })
      }

      Outcome::Wait { message } => {
        self.persist(instance.instance_id(), index).await?;
        self
          .bus
          .publish(WorkflowEvent::Waiting {
            instance_id: instance.instance_id().to_string(),
            workflow: instance.workflow().to_string(),
            step_index: index,
            message: message.clone(),
          })
          .await?;
        info!(
          instance_id = %instance.instance_id(),
          step_index = index,
          message = %message,
          "workflow_waiting"
        );

        let result = RunResult::new(instance.instance_id(), InstanceStatus::Waiting, None);
        instance.settle(Ok(result.clone()));
        Ok(Transition::Settled(result))
      }

      Outcome::Failure(cause) => {
        error!(
          instance_id = %instance.instance_id(),
          step_index = index,
          error = %cause,
          "workflow_failed"
        );

        // The caller learns the cause even if publishing fails.
        instance.settle(Err(EngineError::StepFailed(Arc::clone(&cause).into())));
        self
          .bus
          .publish(WorkflowEvent::Failed {
            instance_id: instance.instance_id().to_string(),
            workflow: instance.workflow().to_string(),
            step_index: index,
            cause,
          })
          .await?;

        Ok(Transition::Settled(RunResult::new(
          instance.instance_id(),
          InstanceStatus::Failed,
          None,
        )))
      }
    }
  }

  async fn complete(&self, instance: &mut Instance) -> Result<Transition, EngineError> {
    self
      .bus
      .publish(WorkflowEvent::Completed {
        instance_id: instance.instance_id().to_string(),
        workflow: instance.workflow().to_string(),
      })
      .await?;
    info!(instance_id = %instance.instance_id(), "workflow_completed");

    let result = RunResult::new(
      instance.instance_id(),
      InstanceStatus::Completed,
      instance.context.output().cloned(),
    );
    instance.settle(Ok(result.clone()));
    Ok(Transition::Settled(result))
  }

  async fn persist(&self, instance_id: &str, next_step: usize) -> Result<(), EngineError> {
    self
      .store
      .save(&WorkflowState::new(instance_id, next_step))
      .await?;
    Ok(())
  }

  /// Hand the instance to the scheduler, to continue at `next`.
  ///
  /// The completion stays outside the callback until the scheduler accepts
  /// it, so a scheduling failure still reaches the waiting caller.
  async fn suspend(
    self: &Arc<Self>,
    mut instance: Instance,
    next: usize,
    resume_at: DateTime<Utc>,
    cancel: &CancellationToken,
  ) -> Result<RunResult, Halt> {
    let instance_id = instance.instance_id().to_string();
    let delay_id = self.next_delay.fetch_add(1, Ordering::Relaxed);
    let token = cancel.child_token();
    self.track(&instance_id, delay_id, ScheduleHandle::new(token.clone()));

    let completion = Arc::new(Mutex::new(instance.completion.take()));
    let handoff = Arc::clone(&completion);
    let dispatcher = Arc::clone(self);
    let callback: ScheduledCallback = Box::new(move |token| {
      instance.completion = handoff.lock().unwrap().take();
      dispatcher.continue_boxed(instance, next, delay_id, token)
    });

    if let Err(error) = self.scheduler.schedule(resume_at, callback, &token).await {
      self.untrack(&instance_id, delay_id);
      warn!(instance_id = %instance_id, error = %error, "delay not scheduled");
      return Err(Halt {
        error: error.into(),
        completion: completion.lock().unwrap().take(),
      });
    }

    Ok(RunResult::new(instance_id, InstanceStatus::Delayed, None))
  }

  /// Continuation run by the scheduler once a delay has elapsed.
  fn continue_boxed(
    self: Arc<Self>,
    instance: Instance,
    index: usize,
    delay_id: u64,
    cancel: CancellationToken,
  ) -> BoxFuture<'static, ()> {
    async move {
      let instance_id = instance.instance_id().to_string();
      self.untrack(&instance_id, delay_id);
      debug!(instance_id = %instance_id, next_step = index, "delay_elapsed");

      if let Err(halt) = self.drive(instance, index, &cancel).await {
        error!(instance_id = %instance_id, error = %halt.error, "continuation failed");
        halt.resolve();
      }
    }
    .boxed()
  }

  fn track(&self, instance_id: &str, delay_id: u64, handle: ScheduleHandle) {
    let mut pending = self.pending.lock().unwrap();
    pending.retain(|_, (_, handle)| !handle.is_cancelled());
    pending.insert(instance_id.to_string(), (delay_id, handle));
  }

  fn untrack(&self, instance_id: &str, delay_id: u64) {
    let mut pending = self.pending.lock().unwrap();
    if pending.get(instance_id).is_some_and(|(id, _)| *id == delay_id) {
      pending.remove(instance_id);
    }
  }
}

impl fmt::Debug for StepDispatcher {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StepDispatcher")
      .field("pending_delays", &self.pending.lock().map(|p| p.len()).unwrap_or(0))
      .finish()
  }
}

/// Wall-clock time at which a delay of `duration` starting now ends.
fn resume_at(duration: Duration) -> DateTime<Utc> {
  TimeDelta::from_std(duration)
    .ok()
    .and_then(|delta| Utc::now().checked_add_signed(delta))
    .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::events::InMemoryEventBus;
  use crate::scheduler::TokioScheduler;
  use async_trait::async_trait;
  use serde_json::json;
  use waypoint_store::InMemoryStore;
  use waypoint_workflow::{Services, Step};

  struct Record(&'static str);

  #[async_trait]
  impl Step for Record {
    async fn execute(&self, ctx: &mut WorkflowContext, _cancel: &CancellationToken) -> Outcome {
      let mut seen = ctx.item("seen").cloned().unwrap_or_else(|| json!([]));
      if let Some(list) = seen.as_array_mut() {
        list.push(json!(self.0));
      }
      ctx.set_item("seen", seen);
      ctx.set_output_value(json!(self.0));
      Outcome::Continue
    }
  }

  struct Returns(Outcome);

  #[async_trait]
  impl Step for Returns {
    async fn execute(&self, _ctx: &mut WorkflowContext, _cancel: &CancellationToken) -> Outcome {
      self.0.clone()
    }
  }

  fn dispatcher(store: &InMemoryStore) -> Arc<StepDispatcher> {
    Arc::new(StepDispatcher::new(
      Arc::new(store.clone()),
      Arc::new(TokioScheduler::new()),
      Arc::new(InMemoryEventBus::new()),
    ))
  }

  fn instance(definition: WorkflowDefinition) -> Instance {
    let context = WorkflowContext::new("inst-1", definition.name(), Services::new());
    Instance::new(Arc::new(definition), context)
  }

  #[tokio::test]
  async fn test_linear_run_persists_each_position() {
    let store = InMemoryStore::new();
    let definition = WorkflowDefinition::builder("linear")
      .step(Record("a"))
      .step(Record("b"))
      .step(Record("c"))
      .build()
      .unwrap();

    let result = dispatcher(&store)
      .dispatch(instance(definition), 0, &CancellationToken::new())
      .await
      .unwrap();

    assert_eq!(result.status, InstanceStatus::Completed);
    assert_eq!(result.output, Some(json!("c")));
    assert_eq!(store.load("inst-1").await.unwrap().unwrap().next_step, 3);
  }

  #[tokio::test]
  async fn test_start_index_skips_earlier_steps() {
    let store = InMemoryStore::new();
    let definition = WorkflowDefinition::builder("linear")
      .step(Returns(Outcome::fail_msg("must not run")))
      .step(Record("b"))
      .build()
      .unwrap();

    let result = dispatcher(&store)
      .dispatch(instance(definition), 1, &CancellationToken::new())
      .await
      .unwrap();

    assert_eq!(result.status, InstanceStatus::Completed);
    assert_eq!(result.output, Some(json!("b")));
  }

  #[tokio::test]
  async fn test_wait_persists_current_index() {
    let store = InMemoryStore::new();
    let definition = WorkflowDefinition::builder("approval")
      .step(Record("a"))
      .step(Returns(Outcome::wait("approval")))
      .step(Record("b"))
      .build()
      .unwrap();

    let result = dispatcher(&store)
      .dispatch(instance(definition), 0, &CancellationToken::new())
      .await
      .unwrap();

    assert_eq!(result.status, InstanceStatus::Waiting);
    assert_eq!(store.load("inst-1").await.unwrap().unwrap().next_step, 1);
  }

  #[tokio::test]
  async fn test_failure_resolves_completion_with_cause() {
    let store = InMemoryStore::new();
    let definition = WorkflowDefinition::builder("failing")
      .step(Returns(Outcome::fail_msg("card declined")))
      .step(Record("never"))
      .build()
      .unwrap();
    let (completion, receiver) = Completion::channel();

    let result = dispatcher(&store)
      .dispatch(
        instance(definition).with_completion(completion),
        0,
        &CancellationToken::new(),
      )
      .await
      .unwrap();

    assert_eq!(result.status, InstanceStatus::Failed);
    let err = receiver.await.unwrap().unwrap_err();
    assert_eq!(err.cause().unwrap().to_string(), "card declined");
    assert!(store.load("inst-1").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_unknown_label_is_an_error() {
    let store = InMemoryStore::new();
    let definition = WorkflowDefinition::builder("jumpy")
      .step(Returns(Outcome::jump("nowhere")))
      .build()
      .unwrap();

    let err = dispatcher(&store)
      .dispatch(instance(definition), 0, &CancellationToken::new())
      .await
      .unwrap_err();

    assert!(matches!(err, EngineError::UnknownLabel { ref label, .. } if label == "nowhere"));
  }

  #[tokio::test]
  async fn test_cancelled_step_does_not_advance() {
    let store = InMemoryStore::new();
    let definition = WorkflowDefinition::builder("cancelled")
      .step(Record("a"))
      .build()
      .unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = dispatcher(&store)
      .dispatch(instance(definition), 0, &cancel)
      .await
      .unwrap_err();

    assert!(matches!(err, EngineError::Cancelled));
    assert!(store.load("inst-1").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_delay_tracks_and_cancels_pending_continuation() {
    let store = InMemoryStore::new();
    let definition = WorkflowDefinition::builder("delayed")
      .step(Returns(Outcome::delay(Duration::from_secs(60))))
      .step(Record("after"))
      .build()
      .unwrap();
    let dispatcher = dispatcher(&store);

    let result = dispatcher
      .dispatch(instance(definition), 0, &CancellationToken::new())
      .await
      .unwrap();

    assert_eq!(result.status, InstanceStatus::Delayed);
    assert!(dispatcher.has_pending_delay("inst-1"));
    assert_eq!(store.load("inst-1").await.unwrap().unwrap().next_step, 1);

    assert!(dispatcher.cancel_delay("inst-1"));
    assert!(!dispatcher.has_pending_delay("inst-1"));
    assert!(!dispatcher.cancel_delay("inst-1"));
    assert_eq!(store.load("inst-1").await.unwrap().unwrap().next_step, 1);
  }

  #[test]
  fn test_resume_at_saturates() {
    assert_eq!(resume_at(Duration::MAX), DateTime::<Utc>::MAX_UTC);
    assert!(resume_at(Duration::from_secs(1)) > Utc::now());
  }
}
