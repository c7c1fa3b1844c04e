use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use waypoint_workflow::{Outcome, Step, WorkflowContext};

/// Suspends the instance for a fixed duration.
///
/// The instance continues with the next step once the scheduler fires; the
/// caller is released in the meantime unless it waits for the result.
#[derive(Debug, Clone, Copy)]
pub struct Delay {
  duration: Duration,
}

impl Delay {
  pub fn new(duration: Duration) -> Self {
    Self { duration }
  }

  pub fn secs(secs: u64) -> Self {
    Self::new(Duration::from_secs(secs))
  }

  pub fn millis(millis: u64) -> Self {
    Self::new(Duration::from_millis(millis))
  }

  pub fn duration(&self) -> Duration {
    self.duration
  }
}

#[async_trait]
impl Step for Delay {
  async fn execute(&self, _ctx: &mut WorkflowContext, _cancel: &CancellationToken) -> Outcome {
    Outcome::delay(self.duration)
  }
}
