//! Workflow runner.
//!
//! The `WorkflowRunner` is the entry point for starting and resuming
//! instances. It resolves the definition, restores the persisted position,
//! seeds the context and hands the instance to the [`StepDispatcher`].

use std::fmt;
use std::sync::{Arc, Weak};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};
use waypoint_store::{InMemoryStore, PersistenceStore};
use waypoint_workflow::{
  DefineWorkflow, ResumeEvent, Services, WorkflowContext, WorkflowDefinition, new_instance_id,
};

use crate::dispatcher::{Completion, Instance, StepDispatcher};
use crate::error::EngineError;
use crate::events::{EventBus, InMemoryEventBus};
use crate::registry::WorkflowRegistry;
use crate::scheduler::{Scheduler, TokioScheduler};

/// Where an instance stands when a run call returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
  /// Ran past its last step.
  Completed,
  /// A step failed.
  Failed,
  /// Parked on a `Wait` outcome until resumed.
  Waiting,
  /// Suspended until a scheduled continuation runs.
  Delayed,
}

/// Result of a run or resume call.
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
  pub instance_id: String,
  pub status: InstanceStatus,
  /// The context's output, set only when the instance completed.
  pub output: Option<Value>,
}

impl RunResult {
  pub fn new(instance_id: impl Into<String>, status: InstanceStatus, output: Option<Value>) -> Self {
    Self {
      instance_id: instance_id.into(),
      status,
      output,
    }
  }
}

type Init = Box<dyn FnOnce(&mut WorkflowContext) + Send>;

/// Parameters of a run call.
///
/// ```ignore
/// let request = RunRequest::new("payment")
///   .input(json!({ "amount": 100 }))
///   .init(|ctx| ctx.set_item("vip", json!(true)))
///   .wait();
/// ```
pub struct RunRequest {
  workflow: String,
  instance_id: Option<String>,
  wait_for_result: bool,
  input: Option<Value>,
  init: Option<Init>,
  event: Option<ResumeEvent>,
  services: Option<Services>,
}

impl RunRequest {
  pub fn new(workflow: impl Into<String>) -> Self {
    Self {
      workflow: workflow.into(),
      instance_id: None,
      wait_for_result: false,
      input: None,
      init: None,
      event: None,
      services: None,
    }
  }

  /// Run a workflow known by type.
  pub fn of<W: DefineWorkflow>() -> Self {
    Self::new(W::NAME)
  }

  /// Use this instance id instead of generating one. An id with a persisted
  /// position continues from that position.
  pub fn instance(mut self, instance_id: impl Into<String>) -> Self {
    self.instance_id = Some(instance_id.into());
    self
  }

  /// Return only once the instance completes, fails or parks on a wait.
  pub fn wait(self) -> Self {
    self.wait_for_result(true)
  }

  pub fn wait_for_result(mut self, wait: bool) -> Self {
    self.wait_for_result = wait;
    self
  }

  pub fn input(mut self, input: Value) -> Self {
    self.input = Some(input);
    self
  }

  /// Seed the context before the first step runs. Applied after `input`.
  pub fn init(mut self, init: impl FnOnce(&mut WorkflowContext) + Send + 'static) -> Self {
    self.init = Some(Box::new(init));
    self
  }

  /// Deliver an event to the instance.
  pub fn event(mut self, event: ResumeEvent) -> Self {
    self.event = Some(event);
    self
  }

  /// Services for this instance instead of the runner's own.
  pub fn services(mut self, services: Services) -> Self {
    self.services = Some(services);
    self
  }

  pub fn workflow(&self) -> &str {
    &self.workflow
  }
}

impl fmt::Debug for RunRequest {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RunRequest")
      .field("workflow", &self.workflow)
      .field("instance_id", &self.instance_id)
      .field("wait_for_result", &self.wait_for_result)
      .field("input", &self.input)
      .field("init", &self.init.is_some())
      .field("event", &self.event)
      .finish()
  }
}

struct RunnerInner {
  registry: WorkflowRegistry,
  dispatcher: Arc<StepDispatcher>,
  services: Services,
}

/// Starts and resumes workflow instances.
///
/// Cloning is cheap; clones share the registry, collaborators and pending
/// delays.
///
/// # Usage
///
/// ```ignore
/// let runner = WorkflowRunner::in_memory(registry);
///
/// let result = runner
///   .run(RunRequest::new("payment").wait(), CancellationToken::new())
///   .await?;
/// ```
#[derive(Clone)]
pub struct WorkflowRunner {
  inner: Arc<RunnerInner>,
}

impl WorkflowRunner {
  /// Create a runner over the given collaborators.
  pub fn new(
    registry: WorkflowRegistry,
    store: Arc<dyn PersistenceStore>,
    scheduler: Arc<dyn Scheduler>,
    bus: Arc<dyn EventBus>,
  ) -> Self {
    Self::with_services(registry, store, scheduler, bus, Services::new())
  }

  /// Create a runner whose instances resolve capabilities from `services`.
  pub fn with_services(
    registry: WorkflowRegistry,
    store: Arc<dyn PersistenceStore>,
    scheduler: Arc<dyn Scheduler>,
    bus: Arc<dyn EventBus>,
    services: Services,
  ) -> Self {
    Self {
      inner: Arc::new(RunnerInner {
        registry,
        dispatcher: Arc::new(StepDispatcher::new(store, scheduler, bus)),
        services,
      }),
    }
  }

  /// A runner with an in-memory store, a tokio scheduler and an in-memory
  /// event bus.
  pub fn in_memory(registry: WorkflowRegistry) -> Self {
    Self::new(
      registry,
      Arc::new(InMemoryStore::new()),
      Arc::new(TokioScheduler::new()),
      Arc::new(InMemoryEventBus::new()),
    )
  }

  pub fn registry(&self) -> &WorkflowRegistry {
    &self.inner.registry
  }

  pub fn store(&self) -> &Arc<dyn PersistenceStore> {
    self.inner.dispatcher.store()
  }

  pub fn bus(&self) -> &Arc<dyn EventBus> {
    self.inner.dispatcher.bus()
  }

  /// A weak handle to this runner, for steps that start nested instances.
  pub fn handle(&self) -> RunnerHandle {
    RunnerHandle(Arc::downgrade(&self.inner))
  }

  /// Start or continue an instance.
  ///
  /// The position is loaded from the store (0 for an unknown id). A waiting
  /// request returns once the instance completes, fails or parks on a wait;
  /// a step failure is returned as [`EngineError::StepFailed`] with the
  /// original cause. Otherwise the call returns at the first suspension or
  /// terminal state, whichever comes first.
  #[instrument(
    name = "workflow_run",
    skip_all,
    fields(workflow = %request.workflow)
  )]
  pub async fn run(
    &self,
    request: RunRequest,
    cancel: CancellationToken,
  ) -> Result<RunResult, EngineError> {
    let definition = self.definition(&request.workflow)?;
    let instance_id = request.instance_id.clone().unwrap_or_else(new_instance_id);
    let start = self
      .store()
      .load(&instance_id)
      .await?
      .map_or(0, |state| state.next_step);

    self.start(definition, instance_id, start, request, cancel).await
  }

  /// Resume a parked instance with an external event.
  ///
  /// The step that returned `Wait` runs again with the event visible in the
  /// context.
  #[instrument(
    name = "workflow_resume",
    skip(self, event, cancel),
    fields(event = %event.name)
  )]
  pub async fn resume(
    &self,
    workflow: &str,
    instance_id: &str,
    event: ResumeEvent,
    cancel: CancellationToken,
  ) -> Result<RunResult, EngineError> {
    let definition = self.definition(workflow)?;
    let state = self
      .store()
      .load(instance_id)
      .await?
      .ok_or_else(|| EngineError::InstanceNotFound {
        instance_id: instance_id.to_string(),
      })?;

    let request = RunRequest::new(workflow).instance(instance_id).event(event);
    self
      .start(definition, instance_id.to_string(), state.next_step, request, cancel)
      .await
  }

  /// Cancel the pending delay of an instance. Returns whether one was pending.
  ///
  /// A caller waiting on the instance is released with
  /// [`EngineError::Cancelled`]. The persisted position is kept.
  pub fn cancel_delay(&self, instance_id: &str) -> bool {
    self.inner.dispatcher.cancel_delay(instance_id)
  }

  pub fn has_pending_delay(&self, instance_id: &str) -> bool {
    self.inner.dispatcher.has_pending_delay(instance_id)
  }

  fn definition(&self, name: &str) -> Result<Arc<WorkflowDefinition>, EngineError> {
    self
      .inner
      .registry
      .get(name)
      .ok_or_else(|| EngineError::WorkflowNotFound {
        name: name.to_string(),
      })
  }

  async fn start(
    &self,
    definition: Arc<WorkflowDefinition>,
    instance_id: String,
    start: usize,
    request: RunRequest,
    cancel: CancellationToken,
  ) -> Result<RunResult, EngineError> {
    let mut services = request
      .services
      .unwrap_or_else(|| self.inner.services.clone());
    services.insert(self.handle());

    let mut context = WorkflowContext::new(&instance_id, definition.name(), services);
    if let Some(input) = request.input {
      context.set_input(input);
    }
    if let Some(init) = request.init {
      init(&mut context);
    }
    if let Some(event) = request.event {
      context.deliver_event(event);
    }

    info!(
      instance_id = %instance_id,
      workflow = %definition.name(),
      start_step = start,
      wait_for_result = request.wait_for_result,
      "workflow_started"
    );

    let mut instance = Instance::new(definition, context);
    let receiver = if request.wait_for_result {
      let (completion, receiver) = Completion::channel();
      instance = instance.with_completion(completion);
      Some(receiver)
    } else {
      None
    };

    let inline = self.inner.dispatcher.dispatch(instance, start, &cancel).await;

    match (receiver, inline) {
      (None, inline) => inline,
      // A settlement sent before the chain stopped wins over the error that
      // stopped it, so a step failure keeps its cause.
      (Some(mut receiver), Err(error)) => receiver.try_recv().unwrap_or(Err(error)),
      // Dropped unresolved only when a pending delay is cancelled.
      (Some(receiver), Ok(_)) => receiver.await.map_err(|_| EngineError::Cancelled)?,
    }
  }
}

impl fmt::Debug for WorkflowRunner {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WorkflowRunner")
      .field("registry", &self.inner.registry)
      .field("dispatcher", &self.inner.dispatcher)
      .finish()
  }
}

/// Weak reference to a [`WorkflowRunner`], available to every step through
/// its context's services.
#[derive(Clone)]
pub struct RunnerHandle(Weak<RunnerInner>);

impl RunnerHandle {
  /// The runner, if it is still alive.
  pub fn runner(&self) -> Option<WorkflowRunner> {
    self.0.upgrade().map(|inner| WorkflowRunner { inner })
  }
}

impl fmt::Debug for RunnerHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RunnerHandle")
      .field("alive", &(self.0.strong_count() > 0))
      .finish()
  }
}
