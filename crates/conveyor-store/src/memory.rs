//! In-memory storage backend and log sink.

use async_trait::async_trait;
use conveyor_core::{
    Error, ExecutionSink, JobConfig, JobName, LogLine, Permalinks, Result, Run, StorageBackend,
};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct JobRecord {
    config: Option<JobConfig>,
    runs: BTreeMap<u64, Run>,
    next_build_number: Option<u64>,
    permalinks: Permalinks,
}

/// Storage that lives for as long as the value does.
///
/// Sharing one `MemoryStorage` between two orchestration contexts simulates
/// a process restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    jobs: RwLock<HashMap<JobName, JobRecord>>,
    logs: RwLock<HashMap<(JobName, u64), Vec<LogLine>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn list_jobs(&self) -> Result<Vec<JobName>> {
        let jobs = self.jobs.read().await;
        let mut names: Vec<JobName> = jobs
            .iter()
            .filter(|(_, r)| r.config.is_some())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn load_job(&self, name: &JobName) -> Result<JobConfig> {
        self.jobs
            .read()
            .await
            .get(name)
            .and_then(|r| r.config.clone())
            .ok_or_else(|| Error::NotFound(format!("job {}", name)))
    }

    async fn save_job(&self, config: &JobConfig) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        jobs.entry(config.name.clone()).or_default().config = Some(config.clone());
        Ok(())
    }

    async fn delete_job(&self, name: &JobName) -> Result<()> {
        self.jobs.write().await.remove(name);
        Ok(())
    }

    async fn list_runs(&self, job: &JobName) -> Result<Vec<u64>> {
        Ok(self
            .jobs
            .read()
            .await
            .get(job)
            .map(|r| r.runs.keys().copied().collect())
            .unwrap_or_default())
    }

    async fn load_run(&self, job: &JobName, number: u64) -> Result<Run> {
        self.jobs
            .read()
            .await
            .get(job)
            .and_then(|r| r.runs.get(&number).cloned())
            .ok_or_else(|| Error::NotFound(format!("run {}#{}", job, number)))
    }

    async fn save_run(&self, run: &Run) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        jobs.entry(run.job.clone())
            .or_default()
            .runs
            .insert(run.number, run.clone());
        Ok(())
    }

    async fn next_build_number(&self, job: &JobName) -> Result<u64> {
        Ok(self
            .jobs
            .read()
            .await
            .get(job)
            .and_then(|r| r.next_build_number)
            .unwrap_or(1))
    }

    async fn save_next_build_number(&self, job: &JobName, next: u64) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        jobs.entry(job.clone()).or_default().next_build_number = Some(next);
        Ok(())
    }

    async fn load_permalinks(&self, job: &JobName) -> Result<Permalinks> {
        Ok(self
            .jobs
            .read()
            .await
            .get(job)
            .map(|r| r.permalinks.clone())
            .unwrap_or_default())
    }

    async fn save_permalinks(&self, job: &JobName, links: &Permalinks) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        jobs.entry(job.clone()).or_default().permalinks = links.clone();
        Ok(())
    }
}

#[async_trait]
impl ExecutionSink for MemoryStorage {
    async fn append(&self, job: &JobName, number: u64, line: LogLine) -> Result<()> {
        self.logs
            .write()
            .await
            .entry((job.clone(), number))
            .or_default()
            .push(line);
        Ok(())
    }

    async fn read(&self, job: &JobName, number: u64) -> Result<Vec<LogLine>> {
        Ok(self
            .logs
            .read()
            .await
            .get(&(job.clone(), number))
            .cloned()
            .unwrap_or_default())
    }

    async fn purge(&self, job: &JobName) -> Result<()> {
        self.logs.write().await.retain(|(j, _), _| j != job);
        Ok(())
    }
}
