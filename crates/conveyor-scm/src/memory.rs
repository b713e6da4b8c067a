//! In-process repositories.
//!
//! Each repository is a linear history of commits; a commit is a full
//! snapshot of the files. Commit IDs are SHA-256 digests of the parent ID,
//! the message and the snapshot, so identical histories get identical IDs.

use async_trait::async_trait;
use conveyor_core::scm::{Checkout, Revision, ScmConfig, ScmProvider};
use conveyor_core::{Error, Result};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone)]
struct Commit {
    id: Revision,
    files: BTreeMap<String, String>,
}

/// Provider for `ScmConfig::Memory` repositories.
#[derive(Debug, Default)]
pub struct MemoryScm {
    repos: RwLock<HashMap<String, Vec<Commit>>>,
}

impl MemoryScm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit file changes on top of the repository head, creating the
    /// repository on first use. Returns the new head.
    pub async fn commit(&self, repo: &str, files: &[(&str, &str)], message: &str) -> Revision {
        let mut repos = self.repos.write().await;
        let history = repos.entry(repo.to_string()).or_default();

        let (parent, mut snapshot) = match history.last() {
            Some(head) => (head.id.as_str().to_string(), head.files.clone()),
            None => (String::new(), BTreeMap::new()),
        };
        for (path, contents) in files {
            snapshot.insert(path.to_string(), contents.to_string());
        }

        let mut hasher = Sha256::new();
        hasher.update(parent.as_bytes());
        hasher.update([0u8]);
        hasher.update(message.as_bytes());
        for (path, contents) in &snapshot {
            hasher.update([0u8]);
            hasher.update(path.as_bytes());
            hasher.update([0u8]);
            hasher.update(contents.as_bytes());
        }
        let id = Revision::new(hex::encode(hasher.finalize()));

        debug!(repo, revision = %id.short(), "Committed to memory repository");
        history.push(Commit {
            id: id.clone(),
            files: snapshot,
        });
        id
    }

    /// Current head of a repository.
    pub async fn head(&self, repo: &str) -> Option<Revision> {
        self.repos
            .read()
            .await
            .get(repo)
            .and_then(|h| h.last())
            .map(|c| c.id.clone())
    }

    fn repo_name(scm: &ScmConfig) -> Result<&str> {
        match scm {
            ScmConfig::Memory { repo } => Ok(repo),
            other => Err(Error::Scm(format!("memory provider cannot handle {}", other))),
        }
    }
}

#[async_trait]
impl ScmProvider for MemoryScm {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn current_revision(&self, scm: &ScmConfig) -> Result<Revision> {
        let repo = Self::repo_name(scm)?;
        self.head(repo)
            .await
            .ok_or_else(|| Error::Scm(format!("repository {} has no commits", repo)))
    }

    async fn checkout(&self, scm: &ScmConfig) -> Result<Checkout> {
        Ok(Checkout {
            scm: scm.clone(),
            revision: self.current_revision(scm).await?,
        })
    }

    async fn read_file(&self, checkout: &Checkout, path: &str) -> Result<String> {
        let repo = Self::repo_name(&checkout.scm)?;
        let repos = self.repos.read().await;
        let commit = repos
            .get(repo)
            .and_then(|h| h.iter().find(|c| c.id == checkout.revision))
            .ok_or_else(|| {
                Error::Scm(format!(
                    "revision {} not found in {}",
                    checkout.revision, repo
                ))
            })?;

        commit
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("{} at {}", path, checkout.revision.short())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ScmConfig {
        ScmConfig::Memory {
            repo: "sample".to_string(),
        }
    }

    #[tokio::test]
    async fn test_commit_moves_head_and_keeps_history_readable() {
        let scm = MemoryScm::new();
        let first = scm
            .commit("sample", &[("build.kdl", "echo \"first\"")], "init")
            .await;
        let old = scm.checkout(&sample()).await.unwrap();
        assert_eq!(old.revision, first);

        let second = scm
            .commit("sample", &[("build.kdl", "echo \"second\"")], "update")
            .await;
        assert_ne!(first, second);
        assert_eq!(scm.current_revision(&sample()).await.unwrap(), second);

        // The earlier checkout still reads the earlier snapshot.
        assert_eq!(
            scm.read_file(&old, "build.kdl").await.unwrap(),
            "echo \"first\""
        );
    }

    #[tokio::test]
    async fn test_empty_repository_has_no_revision() {
        let scm = MemoryScm::new();
        assert!(scm.current_revision(&sample()).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let scm = MemoryScm::new();
        scm.commit("sample", &[("a.txt", "a")], "init").await;
        let checkout = scm.checkout(&sample()).await.unwrap();
        let err = scm.read_file(&checkout, "build.kdl").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_rejects_foreign_scm() {
        let scm = MemoryScm::new();
        assert!(scm.checkout(&ScmConfig::Null).await.is_err());
    }
}
