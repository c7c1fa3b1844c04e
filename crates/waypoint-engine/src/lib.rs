//! Waypoint Engine
//!
//! This crate runs workflow instances: it resolves definitions from a
//! registry, drives steps through the dispatcher state machine, persists the
//! position of every instance after each step and suspends instances on
//! delays and waits.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkflowRunner                         │
//! │  - run(request, cancel) → RunResult                         │
//! │  - resume(workflow, instance_id, event, cancel)             │
//! │  - instance ids, input seeding, completion channel          │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      StepDispatcher                         │
//! │  - executes steps, acts on their Outcome                    │
//! │  - persists the next index before moving on                 │
//! └─────────────────────────────────────────────────────────────┘
//!          │                    │                    │
//!          ▼                    ▼                    ▼
//! ┌──────────────────┐ ┌──────────────────┐ ┌──────────────────┐
//! │ PersistenceStore │ │    Scheduler     │ │     EventBus     │
//! │  save / load     │ │  delayed resume  │ │  publish events  │
//! └──────────────────┘ └──────────────────┘ └──────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use waypoint_engine::{RegistryBuilder, RunRequest, WorkflowRunner};
//! use tokio_util::sync::CancellationToken;
//!
//! let mut registry = RegistryBuilder::new();
//! registry.add_type::<Payment>();
//! let registry = registry.build(&Services::new())?;
//!
//! let runner = WorkflowRunner::in_memory(registry);
//! let result = runner
//!   .run(RunRequest::of::<Payment>().wait(), CancellationToken::new())
//!   .await?;
//! ```

mod dispatcher;
mod error;
mod events;
mod registry;
mod runner;
mod scheduler;

pub use dispatcher::{Completion, Instance, Settlement, StepDispatcher};
pub use error::{EngineError, StepCause};
pub use events::{
  BusError, EventBus, EventHandler, EventKind, InMemoryEventBus, Subscription, WorkflowEvent,
};
pub use registry::{RegistryBuilder, WorkflowFactory, WorkflowRegistry};
pub use runner::{InstanceStatus, RunRequest, RunResult, RunnerHandle, WorkflowRunner};
pub use scheduler::{ScheduleHandle, ScheduledCallback, Scheduler, SchedulerError, TokioScheduler};
