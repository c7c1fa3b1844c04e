use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;
use waypoint_workflow::{Outcome, Step, WorkflowContext};

/// Destination for messages written by [`Log`] steps.
pub trait LogSink: Send + Sync {
  fn write(&self, instance_id: &str, message: &str);
}

/// Writes messages as `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
  fn write(&self, instance_id: &str, message: &str) {
    info!(instance_id = %instance_id, message = %message, "log_step");
  }
}

/// Keeps messages in memory, in write order.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
  lines: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn lines(&self) -> Vec<String> {
    self.lines.lock().unwrap().clone()
  }
}

impl LogSink for MemorySink {
  fn write(&self, _instance_id: &str, message: &str) {
    self.lines.lock().unwrap().push(message.to_string());
  }
}

/// Writes a message and continues.
///
/// The sink is, in order: the one given with [`Log::with_sink`], an
/// `Arc<dyn LogSink>` registered in the context's services, or
/// [`TracingSink`].
#[derive(Clone)]
pub struct Log {
  message: String,
  sink: Option<Arc<dyn LogSink>>,
}

impl Log {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
      sink: None,
    }
  }

  pub fn with_sink(message: impl Into<String>, sink: Arc<dyn LogSink>) -> Self {
    Self {
      message: message.into(),
      sink: Some(sink),
    }
  }

  pub fn message(&self) -> &str {
    &self.message
  }
}

impl fmt::Debug for Log {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Log")
      .field("message", &self.message)
      .field("sink", &self.sink.is_some())
      .finish()
  }
}

#[async_trait]
impl Step for Log {
  async fn execute(&self, ctx: &mut WorkflowContext, _cancel: &CancellationToken) -> Outcome {
    let sink = self
      .sink
      .clone()
      .or_else(|| ctx.services().get::<Arc<dyn LogSink>>().cloned());

    match sink {
      Some(sink) => sink.write(ctx.instance_id(), &self.message),
      None => TracingSink.write(ctx.instance_id(), &self.message),
    }
    Outcome::Continue
  }
}
