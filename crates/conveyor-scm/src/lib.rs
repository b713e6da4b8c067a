//! Source-control providers for Conveyor.
//!
//! Provides `ScmProvider` implementations:
//! - `NullScm` (checks out nothing)
//! - `MemoryScm` (in-process repositories, for tests and demos)
//! - `GitScm` (drives the `git` binary)
//!
//! and the `ScmRegistry` that routes an `ScmConfig` to its provider.

pub mod git;
pub mod memory;
pub mod null;
pub mod registry;

pub use conveyor_core::scm::{Checkout, Revision, ScmConfig, ScmProvider};
pub use git::GitScm;
pub use memory::MemoryScm;
pub use null::NullScm;
pub use registry::ScmRegistry;
