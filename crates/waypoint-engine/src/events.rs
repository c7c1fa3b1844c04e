//! Workflow events and the event bus.
//!
//! The dispatcher publishes an event whenever an instance reaches a terminal
//! or suspended state. Consumers subscribe per event kind to persist, stream
//! or react to them (for example, to resume a waiting instance).

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use waypoint_workflow::Cause;

/// Events emitted by the dispatcher.
#[derive(Clone)]
pub enum WorkflowEvent {
  /// The instance ran past its last step.
  Completed {
    instance_id: String,
    workflow: String,
  },

  /// A step failed and the instance stopped.
  Failed {
    instance_id: String,
    workflow: String,
    step_index: usize,
    cause: Cause,
  },

  /// The instance is parked until resumed externally.
  Waiting {
    instance_id: String,
    workflow: String,
    step_index: usize,
    message: String,
  },

  /// The instance is suspended until a scheduled time.
  Delayed {
    instance_id: String,
    workflow: String,
    next_step: usize,
    resume_at: DateTime<Utc>,
  },
}

impl WorkflowEvent {
  pub fn kind(&self) -> EventKind {
    match self {
      WorkflowEvent::Completed { .. } => EventKind::Completed,
      WorkflowEvent::Failed { .. } => EventKind::Failed,
      WorkflowEvent::Waiting { .. } => EventKind::Waiting,
      WorkflowEvent::Delayed { .. } => EventKind::Delayed,
    }
  }

  pub fn instance_id(&self) -> &str {
    match self {
      WorkflowEvent::Completed { instance_id, .. }
      | WorkflowEvent::Failed { instance_id, .. }
      | WorkflowEvent::Waiting { instance_id, .. }
      | WorkflowEvent::Delayed { instance_id, .. } => instance_id,
    }
  }

  pub fn workflow(&self) -> &str {
    match self {
      WorkflowEvent::Completed { workflow, .. }
      | WorkflowEvent::Failed { workflow, .. }
      | WorkflowEvent::Waiting { workflow, .. }
      | WorkflowEvent::Delayed { workflow, .. } => workflow,
    }
  }
}

impl fmt::Debug for WorkflowEvent {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      WorkflowEvent::Completed {
        instance_id,
        workflow,
      } => f
        .debug_struct("Completed")
        .field("instance_id", instance_id)
        .field("workflow", workflow)
        .finish(),
      WorkflowEvent::Failed {
        instance_id,
        workflow,
        step_index,
        cause,
      } => f
        .debug_struct("Failed")
        .field("instance_id", instance_id)
        .field("workflow", workflow)
        .field("step_index", step_index)
        .field("cause", &cause.to_string())
        .finish(),
      WorkflowEvent::Waiting {
        instance_id,
        workflow,
        step_index,
        message,
      } => f
        .debug_struct("Waiting")
        .field("instance_id", instance_id)
        .field("workflow", workflow)
        .field("step_index", step_index)
        .field("message", message)
        .finish(),
      WorkflowEvent::Delayed {
        instance_id,
        workflow,
        next_step,
        resume_at,
      } => f
        .debug_struct("Delayed")
        .field("instance_id", instance_id)
        .field("workflow", workflow)
        .field("next_step", next_step)
        .field("resume_at", resume_at)
        .finish(),
    }
  }
}

/// Kind of a [`WorkflowEvent`], used to route subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
  Completed,
  Failed,
  Waiting,
  Delayed,
}

/// Error type for event bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
  /// The bus can no longer deliver events.
  #[error("event bus closed")]
  Closed,
}

/// Callback invoked for each published event of a subscribed kind.
pub type EventHandler = Arc<dyn Fn(&WorkflowEvent) + Send + Sync>;

/// Publish/subscribe notification of workflow outcomes.
///
/// Implementations must be safe for concurrent use by many dispatch chains.
#[async_trait]
pub trait EventBus: Send + Sync {
  /// Deliver an event to every handler subscribed to its kind.
  async fn publish(&self, event: WorkflowEvent) -> Result<(), BusError>;

  /// Register `handler` for events of `kind`.
  ///
  /// The handler stays registered until the returned [`Subscription`] is
  /// dropped or explicitly unsubscribed.
  fn subscribe(&self, kind: EventKind, handler: EventHandler) -> Subscription;
}

/// Handle to a registered event handler.
#[must_use = "dropping a subscription unsubscribes its handler"]
pub struct Subscription {
  unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
  pub fn new(unsubscribe: impl FnOnce() + Send + Sync + 'static) -> Self {
    Self {
      unsubscribe: Some(Box::new(unsubscribe)),
    }
  }

  /// Remove the handler now.
  pub fn unsubscribe(mut self) {
    if let Some(unsubscribe) = self.unsubscribe.take() {
      unsubscribe();
    }
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    if let Some(unsubscribe) = self.unsubscribe.take() {
      unsubscribe();
    }
  }
}

impl fmt::Debug for Subscription {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Subscription")
      .field("active", &self.unsubscribe.is_some())
      .finish()
  }
}

type HandlerMap = HashMap<EventKind, Vec<(u64, EventHandler)>>;

/// Process-local event bus.
///
/// Handlers run synchronously inside `publish`, on the publishing task.
/// Keep them short, or forward to a channel with [`InMemoryEventBus::channel`].
#[derive(Clone, Default)]
pub struct InMemoryEventBus {
  handlers: Arc<RwLock<HandlerMap>>,
  next_id: Arc<AtomicU64>,
}

impl InMemoryEventBus {
  pub fn new() -> Self {
    Self::default()
  }

  /// Subscribe with an unbounded channel instead of a callback.
  pub fn channel(&self, kind: EventKind) -> (Subscription, mpsc::UnboundedReceiver<WorkflowEvent>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let subscription = self.subscribe(
      kind,
      Arc::new(move |event: &WorkflowEvent| {
        // Ignore send errors - receiver may have been dropped
        let _ = sender.send(event.clone());
      }),
    );
    (subscription, receiver)
  }

  /// Number of handlers registered for `kind`.
  pub fn subscriber_count(&self, kind: EventKind) -> usize {
    self
      .handlers
      .read()
      .unwrap()
      .get(&kind)
      .map_or(0, Vec::len)
  }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
  async fn publish(&self, event: WorkflowEvent) -> Result<(), BusError> {
    // Snapshot so handlers may subscribe or unsubscribe while running.
    let handlers: Vec<EventHandler> = self
      .handlers
      .read()
      .unwrap()
      .get(&event.kind())
      .map(|entries| entries.iter().map(|(_, h)| h.clone()).collect())
      .unwrap_or_default();

    for handler in handlers {
      handler(&event);
    }
    Ok(())
  }

  fn subscribe(&self, kind: EventKind, handler: EventHandler) -> Subscription {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    self
      .handlers
      .write()
      .unwrap()
      .entry(kind)
      .or_default()
      .push((id, handler));

    let handlers: Weak<RwLock<HandlerMap>> = Arc::downgrade(&self.handlers);
    Subscription::new(move || {
      if let Some(handlers) = handlers.upgrade()
        && let Some(entries) = handlers.write().unwrap().get_mut(&kind)
      {
        entries.retain(|(entry_id, _)| *entry_id != id);
      }
    })
  }
}
