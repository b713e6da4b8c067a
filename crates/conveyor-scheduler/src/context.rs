//! The orchestration context.
//!
//! Owns every job, the build queue and the compute nodes, and runs the
//! background dispatcher and polling ticker. Several contexts can coexist
//! in one process; two contexts sharing a storage backend behave like one
//! controller before and after a restart.

use crate::job::{Job, Lifecycle};
use crate::queue::{BuildQueue, ScheduleHandle};
use crate::{dispatcher, polling};
use conveyor_config::SystemConfig;
use conveyor_core::{
    Cause, Error, ExecutionSink, JobConfig, JobName, JobStatusView, Result, ScmProvider,
    StorageBackend,
};
use conveyor_executor::{BuildServices, Node};
use conveyor_scm::ScmRegistry;
use conveyor_store::{MemoryStorage, RunStore};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub(crate) struct ContextInner {
    pub config: SystemConfig,
    pub storage: Arc<dyn StorageBackend>,
    pub sink: Arc<dyn ExecutionSink>,
    pub scms: ScmRegistry,
    pub jobs: RwLock<HashMap<JobName, Arc<Job>>>,
    /// Names whose deletion is in progress. Inserted and checked only
    /// under the `jobs` write lock.
    pub deleting: Mutex<HashSet<JobName>>,
    pub queue: BuildQueue,
    pub nodes: Vec<Node>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to a running orchestrator. Cheap to clone.
#[derive(Clone)]
pub struct OrchestrationContext {
    pub(crate) inner: Arc<ContextInner>,
}

impl OrchestrationContext {
    pub fn builder() -> OrchestrationContextBuilder {
        OrchestrationContextBuilder::new()
    }

    pub fn config(&self) -> &SystemConfig {
        &self.inner.config
    }

    pub fn queue(&self) -> &BuildQueue {
        &self.inner.queue
    }

    pub fn sink(&self) -> &Arc<dyn ExecutionSink> {
        &self.inner.sink
    }

    /// Compute nodes, for introspection.
    pub fn computers(&self) -> &[Node] {
        &self.inner.nodes
    }

    pub(crate) fn services(&self) -> BuildServices {
        BuildServices {
            sink: self.inner.sink.clone(),
            scms: self.inner.scms.clone(),
        }
    }

    /// Start the dispatcher and the polling ticker.
    pub async fn start(&self) {
        let mut tasks = self.inner.tasks.lock().await;
        if !tasks.is_empty() {
            warn!("Orchestration context already started");
            return;
        }

        let cancel = self.inner.cancel.clone();
        tasks.push(tokio::spawn(dispatcher::run(self.clone(), cancel.clone())));
        tasks.push(tokio::spawn(polling::run_ticker(self.clone(), cancel)));

        info!(
            jobs = self.inner.jobs.read().await.len(),
            nodes = self.inner.nodes.len(),
            "Orchestration context started"
        );
    }

    /// Stop background tasks, drop waiting requests, and abort in-flight runs.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let tasks: Vec<_> = self.inner.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task failed");
            }
        }

        let dropped = self.inner.queue.cancel_all().await;
        let handles = self.executing().await;
        for handle in &handles {
            handle.cancel();
        }
        futures::future::join_all(handles.iter().map(|h| h.wait())).await;

        info!(
            dropped,
            aborted = handles.len(),
            "Orchestration context stopped"
        );
    }

    /// Every execution currently held by a slot.
    pub(crate) async fn executing(&self) -> Vec<conveyor_executor::ExecutionHandle> {
        let mut handles = Vec::new();
        for node in &self.inner.nodes {
            for slot in node.executors() {
                if let Some(handle) = slot.current_executable().await {
                    handles.push(handle);
                }
            }
        }
        handles
    }

    /// Wait until nothing is queued or running.
    pub async fn wait_until_idle(&self) {
        loop {
            if self.inner.queue.is_empty().await && self.executing().await.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    // Jobs

    /// Register and persist a new job.
    pub async fn create_job(&self, config: JobConfig) -> Result<Arc<Job>> {
        let name = config.name.clone();
        let mut jobs = self.inner.jobs.write().await;
        if jobs.contains_key(&name) {
            return Err(Error::Conflict(format!("job {} already exists", name)));
        }
        if self.inner.deleting.lock().await.contains(&name) {
            return Err(Error::Conflict(format!("job {} is being deleted", name)));
        }

        self.inner.storage.save_job(&config).await?;
        let runs = RunStore::open(name.clone(), self.inner.storage.clone()).await?;
        let job = Arc::new(Job::new(config, runs, self.inner.storage.clone()));
        jobs.insert(name.clone(), job.clone());

        info!(job = %name, "Created job");
        Ok(job)
    }

    /// Look up a job by name. Jobs being deleted are not visible.
    pub async fn job(&self, name: &JobName) -> Option<Arc<Job>> {
        self.inner.jobs.read().await.get(name).cloned()
    }

    pub(crate) async fn require_job(&self, name: &JobName) -> Result<Arc<Job>> {
        self.job(name)
            .await
            .ok_or_else(|| Error::NotFound(format!("job {}", name)))
    }

    /// Every visible job, sorted by name.
    pub async fn jobs(&self) -> Vec<Arc<Job>> {
        let mut jobs: Vec<_> = self.inner.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| a.name().cmp(b.name()));
        jobs
    }

    /// Enable or disable a job. Disabling drops the job's waiting request
    /// but leaves running executions alone.
    pub async fn set_enabled(&self, name: &JobName, enabled: bool) -> Result<()> {
        let job = self.require_job(name).await?;
        let mut state = job.state().lock().await;
        job.set_enabled(&mut state, enabled).await?;
        if !enabled {
            let cancelled = self.inner.queue.cancel_for_job(name).await;
            if cancelled > 0 {
                debug!(job = %name, cancelled, "Dropped queued builds of disabled job");
            }
        }
        Ok(())
    }

    /// Enable each named job. Jobs already enabled are left as they are.
    pub async fn enable_jobs(&self, names: &[JobName]) -> Result<()> {
        for name in names {
            self.set_enabled(name, true).await?;
        }
        Ok(())
    }

    pub async fn status(&self, name: &JobName) -> Result<JobStatusView> {
        Ok(self.require_job(name).await?.status().await)
    }

    // Scheduling

    /// Request a build using the job's quiet period. Returns `None`, without
    /// error, if the job is disabled.
    pub async fn schedule(&self, name: &JobName, cause: Cause) -> Result<Option<ScheduleHandle>> {
        self.schedule_with_quiet_period(name, cause, None).await
    }

    /// Request a build, overriding the quiet period if one is given.
    pub async fn schedule_with_quiet_period(
        &self,
        name: &JobName,
        cause: Cause,
        quiet_period: Option<Duration>,
    ) -> Result<Option<ScheduleHandle>> {
        let job = self.require_job(name).await?;
        let state = job.state().lock().await;

        if !state.config.enabled || state.lifecycle != Lifecycle::Active {
            debug!(job = %name, "Ignoring schedule request for disabled job");
            return Ok(None);
        }

        let quiet_period = quiet_period
            .or(state.config.quiet_period)
            .unwrap_or(self.inner.config.quiet_period);
        let handle = self
            .inner
            .queue
            .enqueue(name, cause, Instant::now() + quiet_period)
            .await;

        debug!(job = %name, item = handle.id(), quiet_ms = quiet_period.as_millis() as u64, "Scheduled build");
        Ok(Some(handle))
    }
}

impl std::fmt::Debug for OrchestrationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestrationContext")
            .field("config", &self.inner.config)
            .field("scms", &self.inner.scms)
            .finish()
    }
}

/// Builder for `OrchestrationContext`.
pub struct OrchestrationContextBuilder {
    config: SystemConfig,
    storage: Option<Arc<dyn StorageBackend>>,
    sink: Option<Arc<dyn ExecutionSink>>,
    scms: ScmRegistry,
}

impl OrchestrationContextBuilder {
    pub fn new() -> Self {
        Self {
            config: SystemConfig::default(),
            storage: None,
            sink: None,
            scms: ScmRegistry::new(),
        }
    }

    pub fn config(mut self, config: SystemConfig) -> Self {
        self.config = config;
        self
    }

    pub fn quiet_period(mut self, quiet_period: Duration) -> Self {
        self.config.quiet_period = quiet_period;
        self
    }

    pub fn storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn ExecutionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn scms(mut self, scms: ScmRegistry) -> Self {
        self.scms = scms;
        self
    }

    pub fn scm_provider(mut self, provider: Arc<dyn ScmProvider>) -> Self {
        self.scms.register(provider);
        self
    }

    /// Build the context and load the jobs already in storage. Without an
    /// explicit backend, jobs and logs are kept in memory.
    pub async fn build(self) -> Result<OrchestrationContext> {
        if self.config.tick_interval.is_zero() {
            return Err(Error::InvalidInput(
                "tick interval must be greater than zero".to_string(),
            ));
        }

        let memory = Arc::new(MemoryStorage::new());
        let storage: Arc<dyn StorageBackend> = match self.storage {
            Some(storage) => storage,
            None => memory.clone(),
        };
        let sink: Arc<dyn ExecutionSink> = match self.sink {
            Some(sink) => sink,
            None => memory,
        };

        let mut jobs = HashMap::new();
        for name in storage.list_jobs().await? {
            let config = storage.load_job(&name).await?;
            let runs = RunStore::open(name.clone(), storage.clone()).await?;
            jobs.insert(name, Arc::new(Job::new(config, runs, storage.clone())));
        }

        let nodes = self
            .config
            .nodes
            .iter()
            .map(|n| Node::new(n.name.clone(), n.executors))
            .collect();

        debug!(jobs = jobs.len(), "Loaded jobs from storage");

        Ok(OrchestrationContext {
            inner: Arc::new(ContextInner {
                config: self.config,
                storage,
                sink,
                scms: self.scms,
                jobs: RwLock::new(jobs),
                deleting: Mutex::new(HashSet::new()),
                queue: BuildQueue::new(),
                nodes,
                cancel: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
            }),
        })
    }
}

impl Default for OrchestrationContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}
