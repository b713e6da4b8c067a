//! Core domain types and traits for the Conveyor job orchestrator.
//!
//! This crate contains:
//! - Identifiers (execution IDs, validated job names)
//! - Job configuration and status types
//! - Run records, causes and permalinks
//! - Build definitions and the build script AST
//! - SCM configuration and the `ScmProvider` trait
//! - Collaborator traits for persistence (`StorageBackend`) and build logs (`ExecutionSink`)

pub mod definition;
pub mod error;
pub mod id;
pub mod job;
pub mod run;
pub mod scm;
pub mod sink;
pub mod storage;

pub use definition::{CheckoutTarget, Definition, Script, Step};
pub use error::{Error, Result};
pub use id::{ExecutionId, JobName};
pub use job::{JobConfig, JobStatusView, TriggerConfig};
pub use run::{Cause, Permalinks, Run, RunStatus, ScmCheckout};
pub use scm::{Checkout, Revision, ScmConfig, ScmProvider};
pub use sink::{ExecutionSink, LogLine, LogStream};
pub use storage::StorageBackend;
