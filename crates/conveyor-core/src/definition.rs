//! Build definitions and the build script AST.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::scm::ScmConfig;

/// What a job runs when it builds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Definition {
    /// Script text carried inline in the job configuration.
    Inline { script: String },
    /// Script fetched from a file in an SCM at build time.
    Scm { scm: ScmConfig, script_path: String },
}

impl Definition {
    pub fn inline(script: impl Into<String>) -> Self {
        Definition::Inline {
            script: script.into(),
        }
    }

    pub fn from_scm(scm: ScmConfig, script_path: impl Into<String>) -> Self {
        Definition::Scm {
            scm,
            script_path: script_path.into(),
        }
    }

    /// SCMs this definition uses on its own, independent of any run.
    pub fn scms(&self) -> Vec<ScmConfig> {
        match self {
            Definition::Inline { .. } => Vec::new(),
            Definition::Scm { scm, .. } => vec![scm.clone()],
        }
    }

    /// The SCM a `checkout "scm"` step refers to, if any.
    pub fn own_scm(&self) -> Option<&ScmConfig> {
        match self {
            Definition::Inline { .. } => None,
            Definition::Scm { scm, .. } => Some(scm),
        }
    }
}

impl Default for Definition {
    fn default() -> Self {
        Definition::inline("")
    }
}

/// A parsed build script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    pub steps: Vec<Step>,
}

/// One step of a build script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Write a line to the build log.
    Echo { message: String },
    /// Wait; interrupted by cancellation unless cancellation was already caught.
    Sleep { duration: Duration },
    /// Check out an SCM and record it on the run.
    Checkout { target: CheckoutTarget },
    /// Fail the build.
    Error { message: String },
    /// Run `body`; if it fails or is interrupted, run `catch`.
    Try { body: Vec<Step>, catch: Vec<Step> },
}

/// The SCM a checkout step refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutTarget {
    /// The SCM of the job's own definition.
    DefinitionScm,
    Explicit(ScmConfig),
}
