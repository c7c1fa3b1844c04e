//! Waypoint Steps
//!
//! The step library: ready-made [`Step`](waypoint_workflow::Step)
//! implementations covering every transition of the dispatcher.
//!
//! - [`Delay`] suspends for a fixed duration.
//! - [`Log`] writes a message through a [`LogSink`].
//! - [`Code`] runs caller-supplied code, containing its errors and panics.
//! - [`Branch`] picks one of two steps with a predicate.
//! - [`Jump`] and [`label`] transfer control between labelled steps.
//! - [`WaitForEvent`] parks an instance until a named event is delivered.
//! - [`SubWorkflow`] and [`ConditionalSubWorkflow`] nest workflows.

mod branch;
mod code;
mod delay;
mod guard;
mod jump;
mod log;
mod sub_workflow;
mod wait;

pub use branch::{Branch, Predicate};
pub use code::Code;
pub use delay::Delay;
pub use jump::{Jump, label};
pub use log::{Log, LogSink, MemorySink, TracingSink};
pub use sub_workflow::{ConditionalSubWorkflow, InputSelector, InstanceSelector, SubWorkflow};
pub use wait::WaitForEvent;
pub use waypoint_workflow::NamedStep as Label;
