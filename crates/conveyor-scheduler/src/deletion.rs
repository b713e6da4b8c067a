//! Job deletion.
//!
//! A job moves `Active -> PendingDeletion -> Deleted`. It disappears from
//! lookup at once, its waiting request is dropped, and every run of it is
//! asked to stop. Persisted state is purged only once all of those runs
//! have observably stopped.

use crate::OrchestrationContext;
use crate::job::{Job, Lifecycle};
use conveyor_core::{Error, JobName, Result};
use conveyor_executor::ExecutionHandle;
use futures::future::join_all;
use tracing::{debug, info};

impl OrchestrationContext {
    /// Delete a job, blocking until none of its runs is executing.
    ///
    /// The name stays reserved until persisted state has been purged.
    pub async fn delete_job(&self, name: &JobName) -> Result<()> {
        let job = {
            let mut jobs = self.inner.jobs.write().await;
            let job = jobs
                .remove(name)
                .ok_or_else(|| Error::NotFound(format!("job {}", name)))?;
            self.inner.deleting.lock().await.insert(name.clone());
            job
        };

        let result = self.purge_job(name, &job).await;
        self.inner.deleting.lock().await.remove(name);
        result
    }

    async fn purge_job(&self, name: &JobName, job: &Job) -> Result<()> {
        let mut handles: Vec<ExecutionHandle> = {
            let mut state = job.state().lock().await;
            state.lifecycle = Lifecycle::PendingDeletion;
            let cancelled = self.inner.queue.cancel_for_job(name).await;
            debug!(job = %name, cancelled, "Dropped queued builds of deleted job");
            state.running.drain(..).map(|b| b.handle).collect()
        };

        // Anything a slot still holds counts too.
        for handle in self.executing().await {
            if handle.job() == name && !handles.iter().any(|h| h.id() == handle.id()) {
                handles.push(handle);
            }
        }

        info!(job = %name, executions = handles.len(), "Deleting job; waiting for runs to stop");
        for handle in &handles {
            handle.cancel();
        }
        join_all(handles.iter().map(|h| h.wait())).await;

        self.inner.storage.delete_job(name).await?;
        self.inner.sink.purge(name).await?;
        job.state().lock().await.lifecycle = Lifecycle::Deleted;

        info!(job = %name, "Deleted job");
        Ok(())
    }
}
