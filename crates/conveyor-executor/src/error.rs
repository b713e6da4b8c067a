//! Step-level errors.

use thiserror::Error;

/// Why a build script stopped early.
#[derive(Debug, Error)]
pub enum StepError {
    /// The run was cancelled while a step was interruptible.
    #[error("interrupted")]
    Interrupted,

    /// A step failed.
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Core(#[from] conveyor_core::Error),
}

impl StepError {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, StepError::Interrupted)
    }
}

impl From<conveyor_config::ConfigError> for StepError {
    fn from(e: conveyor_config::ConfigError) -> Self {
        StepError::Failed(format!("invalid build script: {}", e))
    }
}
