//! End-to-end runs through the `Waypoint` builder.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio_util::sync::CancellationToken;
use waypoint::steps::{Code, Delay, Log, LogSink, MemorySink, WaitForEvent};
use waypoint::{
  EngineConfig, InstanceStatus, ResumeEvent, RunRequest, StoreConfig, Waypoint, WorkflowDefinition,
};

fn abc() -> Result<WorkflowDefinition, waypoint::WorkflowError> {
  WorkflowDefinition::builder("abc")
    .step(Log::new("A"))
    .step(Log::new("B"))
    .step(Delay::secs(1))
    .step(Log::new("C"))
    .build()
}

#[tokio::test]
async fn test_log_delay_log_runs_in_order() {
  let sink = MemorySink::new();
  let runner = Waypoint::default()
    .service::<Arc<dyn LogSink>>(Arc::new(sink.clone()))
    .add_workflow("abc", |_| abc())
    .build()
    .await
    .unwrap();

  let started = Instant::now();
  let result = runner
    .run(RunRequest::new("abc").wait(), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(result.status, InstanceStatus::Completed);
  assert!(started.elapsed() >= Duration::from_secs(1));
  assert_eq!(sink.lines(), vec!["A", "B", "C"]);
}

#[tokio::test]
async fn test_non_waiting_run_returns_at_delay() {
  let sink = MemorySink::new();
  let runner = Waypoint::default()
    .service::<Arc<dyn LogSink>>(Arc::new(sink.clone()))
    .add_workflow("abc", |_| abc())
    .build()
    .await
    .unwrap();

  let result = runner
    .run(RunRequest::new("abc"), CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(result.status, InstanceStatus::Delayed);
  assert_eq!(sink.lines(), vec!["A", "B"]);
  assert!(runner.has_pending_delay(&result.instance_id));
}

fn approval() -> Result<WorkflowDefinition, waypoint::WorkflowError> {
  WorkflowDefinition::builder("approval")
    .step(Log::new("requested"))
    .step(WaitForEvent::new("approved"))
    .step(Code::action(|ctx| {
      let by = ctx.item("approved").cloned().unwrap_or_default();
      ctx.set_output(&by)?;
      Ok(())
    }))
    .build()
}

#[tokio::test]
async fn test_sqlite_instance_resumes_after_restart() {
  let dir = tempfile::tempdir().unwrap();
  let url = format!("sqlite://{}", dir.path().join("waypoint.db").display());
  let config = EngineConfig::from_json(
    &json!({ "store": { "type": "sqlite", "url": url, "max_connections": 1 } }).to_string(),
  )
  .unwrap();
  assert!(matches!(config.store, StoreConfig::Sqlite { .. }));

  let sink = MemorySink::new();
  let first = Waypoint::new(config.clone())
    .service::<Arc<dyn LogSink>>(Arc::new(sink.clone()))
    .add_workflow("approval", |_| approval())
    .build()
    .await
    .unwrap();

  let parked = first
    .run(
      RunRequest::new("approval").instance("req-42").wait(),
      CancellationToken::new(),
    )
    .await
    .unwrap();
  assert_eq!(parked.status, InstanceStatus::Waiting);
  drop(first);

  let second = Waypoint::new(config)
    .service::<Arc<dyn LogSink>>(Arc::new(sink.clone()))
    .add_workflow("approval", |_| approval())
    .build()
    .await
    .unwrap();

  let done = second
    .resume(
      "approval",
      "req-42",
      ResumeEvent::new("approved", json!("grace")),
      CancellationToken::new(),
    )
    .await
    .unwrap();

  assert_eq!(done.status, InstanceStatus::Completed);
  assert_eq!(done.output, Some(json!("grace")));
  // "requested" is not logged again: the instance resumed at the wait step.
  assert_eq!(sink.lines(), vec!["requested"]);
}
