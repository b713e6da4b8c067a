//! Build execution for Conveyor.
//!
//! Provides:
//! - `Node` and `ExecutorSlot`, the places builds run
//! - `ExecutionHandle`, a cancellable view of one in-flight run
//! - the interpreter for build scripts
//! - `RunListener`, through which run records leave the executor

pub mod error;
pub mod handle;
pub mod node;
pub mod runner;

pub use error::StepError;
pub use handle::ExecutionHandle;
pub use node::{ExecutorSlot, Node};
pub use runner::{BuildRequest, BuildServices, RunListener};
