//! Live job state.

use async_trait::async_trait;
use conveyor_core::{
    Definition, JobConfig, JobName, JobStatusView, Result, Run, ScmConfig, StorageBackend,
};
use conveyor_executor::{ExecutionHandle, RunListener};
use conveyor_store::{RunStore, ScmTracker};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info};

/// Lifecycle of a job with respect to deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Active,
    /// Invisible to lookup; waiting for in-flight runs to stop.
    PendingDeletion,
    Deleted,
}

/// An execution the job has started.
#[derive(Debug, Clone)]
pub(crate) struct RunningBuild {
    pub handle: ExecutionHandle,
    pub scm_triggered: bool,
}

/// State mutated under the job's lock.
#[derive(Debug)]
pub(crate) struct JobState {
    pub config: JobConfig,
    pub lifecycle: Lifecycle,
    pub running: Vec<RunningBuild>,
}

impl JobState {
    /// Running builds, forgetting the ones that have stopped.
    pub fn running(&mut self) -> &[RunningBuild] {
        self.running.retain(|b| b.handle.is_executing());
        &self.running
    }
}

type Action = Arc<dyn Any + Send + Sync>;

/// A job known to an orchestration context.
pub struct Job {
    name: JobName,
    state: Mutex<JobState>,
    runs: RunStore,
    scms: ScmTracker,
    storage: Arc<dyn StorageBackend>,
    /// Serializes polls of this job.
    pub(crate) poll_lock: Mutex<()>,
    pub(crate) last_polled: Mutex<Option<Instant>>,
    actions: RwLock<HashMap<TypeId, Action>>,
}

impl Job {
    pub(crate) fn new(config: JobConfig, runs: RunStore, storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            name: config.name.clone(),
            state: Mutex::new(JobState {
                config,
                lifecycle: Lifecycle::Active,
                running: Vec::new(),
            }),
            runs,
            scms: ScmTracker::new(),
            storage,
            poll_lock: Mutex::new(()),
            last_polled: Mutex::new(None),
            actions: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &JobName {
        &self.name
    }

    pub(crate) fn state(&self) -> &Mutex<JobState> {
        &self.state
    }

    /// Snapshot of the configuration.
    pub async fn config(&self) -> JobConfig {
        self.state.lock().await.config.clone()
    }

    pub async fn is_enabled(&self) -> bool {
        self.state.lock().await.config.enabled
    }

    pub async fn status(&self) -> JobStatusView {
        JobStatusView::from_enabled(self.is_enabled().await)
    }

    pub async fn lifecycle(&self) -> Lifecycle {
        self.state.lock().await.lifecycle
    }

    pub fn runs(&self) -> &RunStore {
        &self.runs
    }

    pub async fn last_run(&self) -> Result<Option<Arc<Run>>> {
        self.runs.last_run().await
    }

    /// The SCMs of the last successful run, or of the definition if the job
    /// has never run successfully.
    pub async fn current_scms(&self) -> Result<Vec<ScmConfig>> {
        let definition = self.state.lock().await.config.definition.clone();
        self.scms.current_scms(&self.runs, &definition).await
    }

    /// Executions of this job that are still running.
    pub async fn running(&self) -> Vec<ExecutionHandle> {
        self.state
            .lock()
            .await
            .running()
            .iter()
            .map(|b| b.handle.clone())
            .collect()
    }

    /// Attach a typed value to the job, replacing any value of the same type.
    pub async fn add_action<T: Any + Send + Sync>(&self, action: T) {
        self.actions
            .write()
            .await
            .insert(TypeId::of::<T>(), Arc::new(action));
    }

    pub async fn action<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let action = self.actions.read().await.get(&TypeId::of::<T>()).cloned()?;
        action.downcast::<T>().ok()
    }

    /// Flip the enabled flag and persist it. Returns whether it changed.
    pub(crate) async fn set_enabled(&self, state: &mut JobState, enabled: bool) -> Result<bool> {
        if state.config.enabled == enabled {
            return Ok(false);
        }
        let mut config = state.config.clone();
        config.enabled = enabled;
        self.storage.save_job(&config).await?;
        state.config = config;
        info!(job = %self.name, enabled, "Changed job state");
        Ok(true)
    }

    pub async fn set_definition(&self, definition: Definition) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut config = state.config.clone();
        config.definition = definition;
        self.storage.save_job(&config).await?;
        state.config = config;
        debug!(job = %self.name, "Updated definition");
        Ok(())
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job").field("name", &self.name).finish()
    }
}

#[async_trait]
impl RunListener for Job {
    async fn on_started(&self, run: &Run) -> Result<()> {
        self.runs.record(run.clone()).await.map(|_| ())
    }

    async fn on_completed(&self, run: Run) -> Result<Arc<Run>> {
        let run = self.runs.record(run).await?;
        self.scms.record_run(&run).await;
        Ok(run)
    }
}
