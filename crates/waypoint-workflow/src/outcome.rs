//! Step outcomes.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// The error carried by a failed step.
///
/// Shared so the same value can reach the event bus and a waiting caller
/// without being re-wrapped. Use `downcast_ref` to recover the original type.
pub type Cause = Arc<anyhow::Error>;

/// Result of executing one step. The dispatcher acts on exactly one of these
/// per step execution.
#[derive(Clone)]
pub enum Outcome {
  /// Proceed with the next step in order.
  Continue,

  /// Stop the instance. No further steps run.
  Failure(Cause),

  /// Park the instance at the current step until it is resumed externally.
  Wait { message: String },

  /// Suspend and continue with the next step once `duration` has elapsed.
  Delay { duration: Duration },

  /// Continue at the step labelled `label`.
  Jump { label: String },
}

impl Outcome {
  /// Build a failure from any error.
  pub fn fail(error: impl Into<anyhow::Error>) -> Self {
    Outcome::Failure(Arc::new(error.into()))
  }

  /// Build a failure from a plain message.
  pub fn fail_msg(message: impl fmt::Display) -> Self {
    Outcome::Failure(Arc::new(anyhow::anyhow!("{}", message)))
  }

  pub fn wait(message: impl Into<String>) -> Self {
    Outcome::Wait {
      message: message.into(),
    }
  }

  pub fn delay(duration: Duration) -> Self {
    Outcome::Delay { duration }
  }

  pub fn jump(label: impl Into<String>) -> Self {
    Outcome::Jump {
      label: label.into(),
    }
  }

  pub fn is_failure(&self) -> bool {
    matches!(self, Outcome::Failure(_))
  }

  /// Short name of the variant, used in log fields.
  pub fn kind(&self) -> &'static str {
    match self {
      Outcome::Continue => "continue",
      Outcome::Failure(_) => "failure",
      Outcome::Wait { .. } => "wait",
      Outcome::Delay { .. } => "delay",
      Outcome::Jump { .. } => "jump",
    }
  }
}

impl fmt::Debug for Outcome {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Outcome::Continue => f.write_str("Continue"),
      Outcome::Failure(cause) => f.debug_tuple("Failure").field(&cause.to_string()).finish(),
      Outcome::Wait { message } => f.debug_struct("Wait").field("message", message).finish(),
      Outcome::Delay { duration } => f.debug_struct("Delay").field("duration", duration).finish(),
      Outcome::Jump { label } => f.debug_struct("Jump").field("label", label).finish(),
    }
  }
}

impl<E> From<Result<(), E>> for Outcome
where
  E: Into<anyhow::Error>,
{
  fn from(result: Result<(), E>) -> Self {
    match result {
      Ok(()) => Outcome::Continue,
      Err(e) => Outcome::fail(e),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[derive(Debug, thiserror::Error)]
  #[error("card declined")]
  struct Declined;

  #[test]
  fn test_failure_keeps_original_error() {
    let outcome = Outcome::fail(Declined);
    let Outcome::Failure(cause) = outcome else {
      panic!("expected failure");
    };
    assert!(cause.downcast_ref::<Declined>().is_some());
    assert_eq!(cause.to_string(), "card declined");
  }

  #[test]
  fn test_from_result() {
    let ok: Result<(), Declined> = Ok(());
    assert!(matches!(Outcome::from(ok), Outcome::Continue));

    let err: Result<(), Declined> = Err(Declined);
    assert!(Outcome::from(err).is_failure());
  }

  #[test]
  fn test_kind_names() {
    assert_eq!(Outcome::Continue.kind(), "continue");
    assert_eq!(Outcome::wait("x").kind(), "wait");
    assert_eq!(Outcome::delay(Duration::from_secs(1)).kind(), "delay");
    assert_eq!(Outcome::jump("a").kind(), "jump");
    assert_eq!(Outcome::fail_msg("boom").kind(), "failure");
  }
}
