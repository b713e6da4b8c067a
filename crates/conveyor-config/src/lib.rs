//! KDL configuration parsing for Conveyor.
//!
//! This crate handles parsing of:
//! - Build scripts (the step language run by executors)
//! - Job definitions
//! - System configuration
//! - Variable interpolation

pub mod error;
mod kdl_util;
pub mod job;
pub mod script;
pub mod system;
pub mod variables;

pub use error::{ConfigError, ConfigResult};
pub use job::parse_job;
pub use script::parse_script;
pub use system::{NodeConfig, SystemConfig, parse_system_config};
pub use variables::{JobContext, RunContext, ScmContext, VariableContext, VariableContextBuilder};
