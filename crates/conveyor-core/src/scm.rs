//! Source-control configuration and the provider trait.
//!
//! An `ScmConfig` identifies where source material comes from. Providers
//! resolve the current remote revision, check out a revision, and read files
//! from a checkout.

use async_trait::async_trait;
use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Where a build fetches its source material from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScmConfig {
    /// A no-op SCM that checks out nothing.
    Null,
    /// A git repository, resolved by the `git` binary.
    Git { url: String, branch: Option<String> },
    /// A repository held in process memory.
    Memory { repo: String },
}

impl ScmConfig {
    /// Provider key used to look up the `ScmProvider` for this config.
    pub fn kind(&self) -> &'static str {
        match self {
            ScmConfig::Null => "null",
            ScmConfig::Git { .. } => "git",
            ScmConfig::Memory { .. } => "memory",
        }
    }

    /// Stable key identifying this SCM across runs.
    pub fn key(&self) -> String {
        match self {
            ScmConfig::Null => "null".to_string(),
            ScmConfig::Git { url, branch } => match branch {
                Some(branch) => format!("git:{url}#{branch}"),
                None => format!("git:{url}"),
            },
            ScmConfig::Memory { repo } => format!("memory:{repo}"),
        }
    }
}

impl std::fmt::Display for ScmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}

/// An opaque revision identifier (commit SHA or equivalent).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct Revision(pub String);

impl Revision {
    pub fn new(rev: impl Into<String>) -> Self {
        Self(rev.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First seven characters, for log output.
    pub fn short(&self) -> &str {
        let end = self.0.char_indices().nth(7).map(|(i, _)| i).unwrap_or(self.0.len());
        &self.0[..end]
    }
}

/// A checked-out revision of an SCM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkout {
    pub scm: ScmConfig,
    pub revision: Revision,
}

/// Trait for source-control providers.
#[async_trait]
pub trait ScmProvider: Send + Sync {
    /// Provider key, matching `ScmConfig::kind`.
    fn kind(&self) -> &'static str;

    /// Resolve the revision the remote currently points at.
    async fn current_revision(&self, scm: &ScmConfig) -> Result<Revision>;

    /// Check out the current revision.
    async fn checkout(&self, scm: &ScmConfig) -> Result<Checkout>;

    /// Read a file from a previous checkout.
    async fn read_file(&self, checkout: &Checkout, path: &str) -> Result<String>;
}
