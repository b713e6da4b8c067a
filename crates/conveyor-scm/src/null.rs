//! The null SCM.

use async_trait::async_trait;
use conveyor_core::scm::{Checkout, Revision, ScmConfig, ScmProvider};
use conveyor_core::{Error, Result};

const NULL_REVISION: &str = "none";

/// Checks out nothing and never changes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullScm;

#[async_trait]
impl ScmProvider for NullScm {
    fn kind(&self) -> &'static str {
        "null"
    }

    async fn current_revision(&self, _scm: &ScmConfig) -> Result<Revision> {
        Ok(Revision::new(NULL_REVISION))
    }

    async fn checkout(&self, scm: &ScmConfig) -> Result<Checkout> {
        Ok(Checkout {
            scm: scm.clone(),
            revision: Revision::new(NULL_REVISION),
        })
    }

    async fn read_file(&self, _checkout: &Checkout, path: &str) -> Result<String> {
        Err(Error::NotFound(format!("{} (null scm has no files)", path)))
    }
}
