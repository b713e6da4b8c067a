//! Persistence layer for Conveyor.
//!
//! Provides the `StorageBackend` and `ExecutionSink` implementations
//! (in-memory and filesystem), the lazily loading `RunStore`, and the
//! per-job `ScmTracker`.

pub mod error;
pub mod fs;
pub mod memory;
pub mod run_store;
pub mod scm_tracker;

pub use fs::FsStorage;
pub use memory::MemoryStorage;
pub use run_store::RunStore;
pub use scm_tracker::ScmTracker;
