//! Waypoint Workflow
//!
//! This crate provides the building blocks shared by every other waypoint
//! crate: the [`Outcome`] a step produces, the [`Step`] capability itself,
//! immutable [`WorkflowDefinition`]s and the per-instance [`WorkflowContext`].
//!
//! Nothing here knows about persistence or scheduling. The dispatcher in
//! `waypoint-engine` drives steps purely through the types defined here.

mod context;
mod definition;
mod error;
mod outcome;
mod services;
mod step;

pub use context::{ResumeEvent, WorkflowContext, new_instance_id};
pub use definition::{DefineWorkflow, WorkflowBuilder, WorkflowDefinition};
pub use error::WorkflowError;
pub use outcome::{Cause, Outcome};
pub use services::Services;
pub use step::{NamedStep, Step};
