//! Filesystem storage backend and log sink.
//!
//! Layout under the root directory:
//!
//! ```text
//! jobs/<name>/config.json
//! jobs/<name>/nextBuildNumber
//! jobs/<name>/permalinks.json
//! jobs/<name>/builds/<number>/run.json
//! jobs/<name>/builds/<number>/log.jsonl
//! ```

use crate::error::{decode_error, encode_error, io_error};
use async_trait::async_trait;
use conveyor_core::{
    Error, ExecutionSink, JobConfig, JobName, LogLine, Permalinks, Result, Run, StorageBackend,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Storage rooted at a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn jobs_dir(&self) -> PathBuf {
        self.root.join("jobs")
    }

    fn job_dir(&self, job: &JobName) -> PathBuf {
        self.jobs_dir().join(job.as_str())
    }

    fn builds_dir(&self, job: &JobName) -> PathBuf {
        self.job_dir(job).join("builds")
    }

    fn run_dir(&self, job: &JobName, number: u64) -> PathBuf {
        self.builds_dir(job).join(number.to_string())
    }

    /// Write via a temporary file and rename.
    async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, contents)
            .await
            .map_err(|e| io_error(&tmp, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| io_error(path, e))
    }

    async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value).map_err(encode_error)?;
        Self::write_atomic(path, &bytes).await
    }

    async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
        let bytes = tokio::fs::read(path).await.map_err(|e| io_error(path, e))?;
        serde_json::from_slice(&bytes).map_err(|e| decode_error(path, e))
    }

    /// Like `read_json`, but a missing file yields `None`.
    async fn read_json_opt<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        match Self::read_json(path).await {
            Ok(value) => Ok(Some(value)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Names of the entries of a directory; a missing directory is empty.
    async fn dir_entries(dir: &Path) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(dir, e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(dir, e))? {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        Ok(names)
    }
}

#[async_trait]
impl StorageBackend for FsStorage {
    async fn list_jobs(&self) -> Result<Vec<JobName>> {
        let mut names = Vec::new();
        for entry in Self::dir_entries(&self.jobs_dir()).await? {
            let Ok(name) = JobName::new(entry.clone()) else {
                warn!(entry = %entry, "Ignoring unexpected entry in jobs directory");
                continue;
            };
            let config = self.job_dir(&name).join("config.json");
            if tokio::fs::try_exists(&config).await.unwrap_or(false) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    async fn load_job(&self, name: &JobName) -> Result<JobConfig> {
        Self::read_json(&self.job_dir(name).join("config.json")).await
    }

    async fn save_job(&self, config: &JobConfig) -> Result<()> {
        Self::write_json(&self.job_dir(&config.name).join("config.json"), config).await
    }

    async fn delete_job(&self, name: &JobName) -> Result<()> {
        let dir = self.job_dir(name);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!(job = %name, path = %dir.display(), "Removed job directory");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&dir, e)),
        }
    }

    async fn list_runs(&self, job: &JobName) -> Result<Vec<u64>> {
        Ok(Self::dir_entries(&self.builds_dir(job))
            .await?
            .iter()
            .filter_map(|name| name.parse::<u64>().ok())
            .collect())
    }

    async fn load_run(&self, job: &JobName, number: u64) -> Result<Run> {
        Self::read_json(&self.run_dir(job, number).join("run.json")).await
    }

    async fn save_run(&self, run: &Run) -> Result<()> {
        Self::write_json(&self.run_dir(&run.job, run.number).join("run.json"), run).await
    }

    async fn next_build_number(&self, job: &JobName) -> Result<u64> {
        let path = self.job_dir(job).join("nextBuildNumber");
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => text
                .trim()
                .parse()
                .map_err(|_| Error::Corrupt(format!("{}: not a number", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(1),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    async fn save_next_build_number(&self, job: &JobName, next: u64) -> Result<()> {
        let path = self.job_dir(job).join("nextBuildNumber");
        Self::write_atomic(&path, format!("{}\n", next).as_bytes()).await
    }

    async fn load_permalinks(&self, job: &JobName) -> Result<Permalinks> {
        Ok(Self::read_json_opt(&self.job_dir(job).join("permalinks.json"))
            .await?
            .unwrap_or_default())
    }

    async fn save_permalinks(&self, job: &JobName, links: &Permalinks) -> Result<()> {
        Self::write_json(&self.job_dir(job).join("permalinks.json"), links).await
    }
}

#[async_trait]
impl ExecutionSink for FsStorage {
    async fn append(&self, job: &JobName, number: u64, line: LogLine) -> Result<()> {
        let dir = self.run_dir(job, number);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error(&dir, e))?;

        let path = dir.join("log.jsonl");
        let mut bytes = serde_json::to_vec(&line).map_err(encode_error)?;
        bytes.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| io_error(&path, e))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| io_error(&path, e))?;
        file.flush().await.map_err(|e| io_error(&path, e))
    }

    async fn read(&self, job: &JobName, number: u64) -> Result<Vec<LogLine>> {
        let path = self.run_dir(job, number).join("log.jsonl");
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&path, e)),
        };

        text.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(|e| decode_error(&path, e)))
            .collect()
    }

    async fn purge(&self, _job: &JobName) -> Result<()> {
        // Logs live under the job directory and go with `delete_job`.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use conveyor_core::{Cause, RunStatus};

    fn job(name: &str) -> JobName {
        JobName::new(name).unwrap()
    }

    #[tokio::test]
    async fn test_job_and_runs_persist_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let name = job("p");

        let storage = FsStorage::new(dir.path());
        storage.save_job(&JobConfig::new(name.clone())).await.unwrap();
        let mut run = Run::started(name.clone(), 1, vec![Cause::Cli], Utc::now());
        run.status = RunStatus::Success;
        storage.save_run(&run).await.unwrap();
        storage.save_next_build_number(&name, 2).await.unwrap();

        let reopened = FsStorage::new(dir.path());
        assert_eq!(reopened.list_jobs().await.unwrap(), vec![name.clone()]);
        assert_eq!(reopened.list_runs(&name).await.unwrap(), vec![1]);
        assert_eq!(reopened.load_run(&name, 1).await.unwrap(), run);
        assert_eq!(reopened.next_build_number(&name).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_missing_run_differs_from_corrupt_run() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        let name = job("p");

        let missing = storage.load_run(&name, 3).await.unwrap_err();
        assert!(matches!(missing, Error::NotFound(_)));

        let run_dir = dir.path().join("jobs/p/builds/3");
        std::fs::create_dir_all(&run_dir).unwrap();
        std::fs::write(run_dir.join("run.json"), b"{ not json").unwrap();

        let corrupt = storage.load_run(&name, 3).await.unwrap_err();
        assert!(matches!(corrupt, Error::Corrupt(_)));
    }

    #[tokio::test]
    async fn test_fresh_job_starts_at_one() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        let name = job("fresh");
        assert_eq!(storage.next_build_number(&name).await.unwrap(), 1);
        assert_eq!(
            storage.load_permalinks(&name).await.unwrap(),
            Permalinks::default()
        );
    }

    #[tokio::test]
    async fn test_log_append_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        let name = job("p");
        storage.save_job(&JobConfig::new(name.clone())).await.unwrap();

        storage.append(&name, 1, LogLine::stdout("first")).await.unwrap();
        storage.append(&name, 1, LogLine::stdout("second")).await.unwrap();

        let lines = storage.read(&name, 1).await.unwrap();
        let contents: Vec<_> = lines.iter().map(|l| l.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second"]);

        storage.delete_job(&name).await.unwrap();
        assert!(storage.read(&name, 1).await.unwrap().is_empty());
        assert!(storage.list_jobs().await.unwrap().is_empty());
    }
}
