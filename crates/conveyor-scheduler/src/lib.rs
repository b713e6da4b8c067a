//! Job scheduling for Conveyor.
//!
//! `OrchestrationContext` ties the pieces together:
//! - the build queue, which folds repeated requests for a job into one
//! - the dispatcher, which starts due requests on free executor slots
//! - SCM polling, on demand and on a per-job interval
//! - job deletion, which waits for in-flight runs before purging state

mod context;
mod deletion;
mod dispatcher;
pub mod job;
mod polling;
pub mod queue;

pub use context::{OrchestrationContext, OrchestrationContextBuilder};
pub use job::{Job, Lifecycle};
pub use polling::PollOutcome;
pub use queue::{BuildQueue, ItemState, ScheduleHandle};
