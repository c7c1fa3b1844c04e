//! One-shot timed callbacks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Work to run when a scheduled time arrives.
///
/// The callback receives the token of its [`ScheduleHandle`], so it can stop
/// early if the handle is cancelled while it runs.
pub type ScheduledCallback = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, ()> + Send>;

/// Error type for scheduler operations.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
  /// There is no async runtime to run the callback on.
  #[error("no async runtime available to schedule on")]
  NoRuntime,

  /// Scheduling was cancelled before the callback was armed.
  #[error("scheduling cancelled")]
  Cancelled,
}

/// Handle to a pending callback.
#[derive(Debug, Clone)]
pub struct ScheduleHandle {
  token: CancellationToken,
}

impl ScheduleHandle {
  pub fn new(token: CancellationToken) -> Self {
    Self { token }
  }

  /// Prevent the callback from running. No effect once it has started.
  pub fn cancel(&self) {
    self.token.cancel();
  }

  pub fn is_cancelled(&self) -> bool {
    self.token.is_cancelled()
  }

  pub fn token(&self) -> &CancellationToken {
    &self.token
  }
}

/// Arms one-shot callbacks at a future time.
#[async_trait]
pub trait Scheduler: Send + Sync {
  /// Run `callback` at `at`, on the scheduler's own execution context.
  ///
  /// Cancelling `cancel` (or the returned handle) before `at` prevents the
  /// callback from running.
  async fn schedule(
    &self,
    at: DateTime<Utc>,
    callback: ScheduledCallback,
    cancel: &CancellationToken,
  ) -> Result<ScheduleHandle, SchedulerError>;
}

/// Scheduler that sleeps on a spawned tokio task.
#[derive(Debug, Clone, Default)]
pub struct TokioScheduler;

impl TokioScheduler {
  pub fn new() -> Self {
    Self
  }
}

#[async_trait]
impl Scheduler for TokioScheduler {
  async fn schedule(
    &self,
    at: DateTime<Utc>,
    callback: ScheduledCallback,
    cancel: &CancellationToken,
  ) -> Result<ScheduleHandle, SchedulerError> {
    if cancel.is_cancelled() {
      return Err(SchedulerError::Cancelled);
    }

    let runtime = tokio::runtime::Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;
    let token = cancel.child_token();
    let handle = ScheduleHandle::new(token.clone());

    // Past deadlines fire immediately.
    let wait = (at - Utc::now()).to_std().unwrap_or_default();

    let callback_token = token.clone();
    runtime.spawn(async move {
      tokio::select! {
        _ = token.cancelled() => {
          debug!("scheduled callback cancelled");
        }
        _ = tokio::time::sleep(wait) => {
          callback(callback_token).await;
        }
      }
    });

    Ok(handle)
  }
}
