//! Persistence abstraction for jobs and runs.

use async_trait::async_trait;

use crate::{JobConfig, JobName, Permalinks, Result, Run};

/// Durable storage for job configuration and run records.
///
/// `list_runs` must be cheap: it returns run numbers without reading the
/// records themselves. `load_run` is the expensive call that callers cache.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Names of every persisted job.
    async fn list_jobs(&self) -> Result<Vec<JobName>>;

    async fn load_job(&self, name: &JobName) -> Result<JobConfig>;

    async fn save_job(&self, config: &JobConfig) -> Result<()>;

    /// Remove a job and everything persisted under it.
    async fn delete_job(&self, name: &JobName) -> Result<()>;

    /// Numbers of every persisted run of a job, in any order.
    async fn list_runs(&self, job: &JobName) -> Result<Vec<u64>>;

    /// Load one run record. `Error::NotFound` if it does not exist,
    /// `Error::Corrupt` if it exists but cannot be decoded.
    async fn load_run(&self, job: &JobName, number: u64) -> Result<Run>;

    async fn save_run(&self, run: &Run) -> Result<()>;

    /// The next run number to hand out; 1 for a job that never ran.
    async fn next_build_number(&self, job: &JobName) -> Result<u64>;

    async fn save_next_build_number(&self, job: &JobName, next: u64) -> Result<()>;

    async fn load_permalinks(&self, job: &JobName) -> Result<Permalinks>;

    async fn save_permalinks(&self, job: &JobName, links: &Permalinks) -> Result<()>;
}
