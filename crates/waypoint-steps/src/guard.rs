//! Panic containment for user-supplied closures.

use std::any::Any;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};

use futures::FutureExt;

/// Run `f`, turning a panic into an error.
pub(crate) fn guard<T>(f: impl FnOnce() -> T) -> anyhow::Result<T> {
  catch_unwind(AssertUnwindSafe(f)).map_err(panicked)
}

/// Await `future`, turning a panic into an error.
pub(crate) async fn guard_async<T>(future: impl Future<Output = T>) -> anyhow::Result<T> {
  AssertUnwindSafe(future).catch_unwind().await.map_err(panicked)
}

fn panicked(payload: Box<dyn Any + Send>) -> anyhow::Error {
  let message = payload
    .downcast_ref::<&str>()
    .map(|s| s.to_string())
    .or_else(|| payload.downcast_ref::<String>().cloned())
    .unwrap_or_else(|| "unknown panic payload".to_string());
  anyhow::anyhow!("step panicked: {}", message)
}
