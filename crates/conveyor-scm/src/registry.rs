//! Routing from `ScmConfig` to provider.

use crate::{GitScm, NullScm};
use conveyor_core::scm::{Checkout, Revision, ScmConfig, ScmProvider};
use conveyor_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Set of SCM providers, keyed by the `ScmConfig` kind they handle.
#[derive(Clone)]
pub struct ScmRegistry {
    providers: HashMap<&'static str, Arc<dyn ScmProvider>>,
}

impl ScmRegistry {
    /// A registry that only knows the null SCM.
    pub fn new() -> Self {
        let mut registry = Self {
            providers: HashMap::new(),
        };
        registry.register(Arc::new(NullScm));
        registry
    }

    /// Null and git providers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(GitScm::new()));
        registry
    }

    /// Add a provider, replacing any provider of the same kind.
    pub fn register(&mut self, provider: Arc<dyn ScmProvider>) -> &mut Self {
        self.providers.insert(provider.kind(), provider);
        self
    }

    pub fn provider(&self, scm: &ScmConfig) -> Result<Arc<dyn ScmProvider>> {
        self.providers
            .get(scm.kind())
            .cloned()
            .ok_or_else(|| Error::Scm(format!("no provider registered for {} scm", scm.kind())))
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.providers.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    pub async fn current_revision(&self, scm: &ScmConfig) -> Result<Revision> {
        self.provider(scm)?.current_revision(scm).await
    }

    pub async fn checkout(&self, scm: &ScmConfig) -> Result<Checkout> {
        self.provider(scm)?.checkout(scm).await
    }

    pub async fn read_file(&self, checkout: &Checkout, path: &str) -> Result<String> {
        self.provider(&checkout.scm)?
            .read_file(checkout, path)
            .await
    }
}

impl Default for ScmRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ScmRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScmRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
