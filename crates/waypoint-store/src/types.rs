use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The persisted position of a workflow instance.
///
/// `next_step` always names the step to execute next, never one that has
/// already completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowState {
  pub instance_id: String,
  pub next_step: usize,
  pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
  /// Create a state stamped with the current time.
  pub fn new(instance_id: impl Into<String>, next_step: usize) -> Self {
    Self {
      instance_id: instance_id.into(),
      next_step,
      updated_at: Utc::now(),
    }
  }
}
