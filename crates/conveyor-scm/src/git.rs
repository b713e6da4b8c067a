//! Git provider driving the `git` binary.

use async_trait::async_trait;
use conveyor_core::scm::{Checkout, Revision, ScmConfig, ScmProvider};
use conveyor_core::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Provider for `ScmConfig::Git`.
pub struct GitScm {
    /// Base directory for clones
    work_dir: PathBuf,
    /// Serializes clones through the staging directory.
    clone_lock: Mutex<()>,
}

impl Default for GitScm {
    fn default() -> Self {
        Self::new()
    }
}

impl GitScm {
    pub fn new() -> Self {
        let work_dir = std::env::var("CONVEYOR_WORK_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir().join("conveyor-checkouts"));

        Self::with_work_dir(work_dir)
    }

    pub fn with_work_dir(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            clone_lock: Mutex::new(()),
        }
    }

    fn remote(scm: &ScmConfig) -> Result<(&str, Option<&str>)> {
        match scm {
            ScmConfig::Git { url, branch } => Ok((url, branch.as_deref())),
            other => Err(Error::Scm(format!("git provider cannot handle {}", other))),
        }
    }

    /// Directory holding every checkout of a remote.
    fn clone_path(&self, scm: &ScmConfig) -> PathBuf {
        let hash = format!("{:x}", md5::compute(scm.key()));
        self.work_dir.join(hash)
    }

    /// Checkout directory of one revision. Never rewritten once created.
    fn checkout_path(&self, scm: &ScmConfig, revision: &Revision) -> PathBuf {
        self.clone_path(scm).join(revision.as_str())
    }

    async fn git(args: &[&str], cwd: Option<&Path>) -> Result<String> {
        let mut cmd = Command::new("git");
        cmd.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }

        let output = cmd
            .output()
            .await
            .map_err(|e| Error::Scm(format!("failed to run git: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Scm(format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl ScmProvider for GitScm {
    fn kind(&self) -> &'static str {
        "git"
    }

    async fn current_revision(&self, scm: &ScmConfig) -> Result<Revision> {
        let (url, branch) = Self::remote(scm)?;
        let reference = branch.unwrap_or("HEAD");

        let stdout = Self::git(&["ls-remote", url, reference], None).await?;
        let sha = stdout
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().next())
            .ok_or_else(|| Error::Scm(format!("{} has no ref {}", url, reference)))?;

        debug!(url = %url, reference, sha, "Resolved remote revision");
        Ok(Revision::new(sha))
    }

    async fn checkout(&self, scm: &ScmConfig) -> Result<Checkout> {
        let (url, branch) = Self::remote(scm)?;
        let staging = self.clone_path(scm).join(".staging");
        let staging_str = staging
            .to_str()
            .ok_or_else(|| Error::Scm(format!("non-UTF-8 work dir {}", staging.display())))?;

        let _guard = self.clone_lock.lock().await;

        tokio::fs::create_dir_all(self.clone_path(scm))
            .await
            .map_err(|e| Error::Scm(format!("failed to create work dir: {}", e)))?;

        if staging.exists() {
            if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
                warn!(path = %staging.display(), error = %e, "Failed to remove stale clone");
            }
        }

        info!(url = %url, path = %staging.display(), "Cloning repository");

        let mut args = vec!["clone", "--depth", "1", "--single-branch"];
        if let Some(branch) = branch {
            args.extend(["--branch", branch]);
        }
        args.extend([url, staging_str]);
        Self::git(&args, None).await?;

        let sha = Self::git(&["rev-parse", "HEAD"], Some(&staging)).await?;
        let revision = Revision::new(sha.trim());

        let target = self.checkout_path(scm, &revision);
        if target.exists() {
            debug!(revision = %revision.short(), "Revision already checked out");
            if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
                warn!(path = %staging.display(), error = %e, "Failed to remove clone");
            }
        } else {
            tokio::fs::rename(&staging, &target)
                .await
                .map_err(|e| Error::Scm(format!("failed to move clone into place: {}", e)))?;
        }

        info!(url = %url, revision = %revision.short(), "Repository checked out");
        Ok(Checkout {
            scm: scm.clone(),
            revision,
        })
    }

    async fn read_file(&self, checkout: &Checkout, path: &str) -> Result<String> {
        let checkout_path = self.checkout_path(&checkout.scm, &checkout.revision);
        let object = format!("{}:{}", checkout.revision, path);
        Self::git(&["show", &object], Some(&checkout_path))
            .await
            .map_err(|e| match e {
                Error::Scm(msg) if msg.contains("does not exist") => {
                    Error::NotFound(format!("{} at {}", path, checkout.revision.short()))
                }
                other => other,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_path_is_deterministic_per_remote() {
        let scm = GitScm::with_work_dir("/tmp/conveyor-test");
        let a = ScmConfig::Git {
            url: "https://example.com/a.git".to_string(),
            branch: None,
        };
        let b = ScmConfig::Git {
            url: "https://example.com/a.git".to_string(),
            branch: Some("dev".to_string()),
        };
        assert_eq!(scm.clone_path(&a), scm.clone_path(&a));
        assert_ne!(scm.clone_path(&a), scm.clone_path(&b));
        assert!(scm.clone_path(&a).starts_with("/tmp/conveyor-test"));
    }

    #[test]
    fn test_each_revision_gets_its_own_checkout() {
        let scm = GitScm::with_work_dir("/tmp/conveyor-test");
        let remote = ScmConfig::Git {
            url: "https://example.com/a.git".to_string(),
            branch: None,
        };
        let first = scm.checkout_path(&remote, &Revision::new("aaa"));
        let second = scm.checkout_path(&remote, &Revision::new("bbb"));
        assert_ne!(first, second);
        assert!(first.starts_with(scm.clone_path(&remote)));
    }

    #[tokio::test]
    async fn test_rejects_foreign_scm() {
        let scm = GitScm::with_work_dir("/tmp/conveyor-test");
        assert!(scm.current_revision(&ScmConfig::Null).await.is_err());
    }

    async fn commit_file(repo: &Path, contents: &str) {
        std::fs::write(repo.join("build.kdl"), contents).unwrap();
        GitScm::git(&["add", "build.kdl"], Some(repo)).await.unwrap();
        GitScm::git(
            &[
                "-c",
                "user.name=test",
                "-c",
                "user.email=test@example.com",
                "commit",
                "-q",
                "-m",
                contents,
            ],
            Some(repo),
        )
        .await
        .unwrap();
    }

    /// Requires the `git` binary. Run with: cargo test -- --ignored
    #[tokio::test]
    #[ignore]
    async fn test_local_repository_roundtrip() {
        let repo = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let repo_path = repo.path();

        GitScm::git(&["init", "-q"], Some(repo_path)).await.unwrap();
        commit_file(repo_path, "echo \"first version\"").await;

        let provider = GitScm::with_work_dir(work.path());
        let scm = ScmConfig::Git {
            url: format!("file://{}", repo_path.display()),
            branch: None,
        };

        let remote = provider.current_revision(&scm).await.unwrap();
        let checkout = provider.checkout(&scm).await.unwrap();
        assert_eq!(checkout.revision, remote);

        let contents = provider.read_file(&checkout, "build.kdl").await.unwrap();
        assert_eq!(contents, "echo \"first version\"");
    }

    /// Requires the `git` binary. Run with: cargo test -- --ignored
    #[tokio::test]
    #[ignore]
    async fn test_later_checkout_keeps_earlier_one_readable() {
        let repo = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let repo_path = repo.path();

        GitScm::git(&["init", "-q"], Some(repo_path)).await.unwrap();
        commit_file(repo_path, "echo \"v1\"").await;

        let provider = GitScm::with_work_dir(work.path());
        let scm = ScmConfig::Git {
            url: format!("file://{}", repo_path.display()),
            branch: None,
        };

        let first = provider.checkout(&scm).await.unwrap();
        commit_file(repo_path, "echo \"v2\"").await;
        let second = provider.checkout(&scm).await.unwrap();
        assert_ne!(first.revision, second.revision);

        assert_eq!(provider.read_file(&first, "build.kdl").await.unwrap(), "echo \"v1\"");
        assert_eq!(provider.read_file(&second, "build.kdl").await.unwrap(), "echo \"v2\"");

        let again = provider.checkout(&scm).await.unwrap();
        assert_eq!(again.revision, second.revision);
        assert_eq!(provider.read_file(&first, "build.kdl").await.unwrap(), "echo \"v1\"");
    }
}
