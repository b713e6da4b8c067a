//! Compute nodes and their execution slots.

use crate::ExecutionHandle;
use crate::runner::{self, BuildRequest, BuildServices};
use conveyor_core::ExecutionId;
use std::sync::Arc;
use tokio::sync::{RwLock, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// A compute node offering a fixed number of execution slots.
#[derive(Debug)]
pub struct Node {
    name: String,
    executors: Vec<Arc<ExecutorSlot>>,
}

impl Node {
    pub fn new(name: impl Into<String>, executors: usize) -> Self {
        let name = name.into();
        let executors = (0..executors)
            .map(|number| Arc::new(ExecutorSlot::new(name.clone(), number)))
            .collect();
        Self { name, executors }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn executors(&self) -> &[Arc<ExecutorSlot>] {
        &self.executors
    }

    /// Number of slots currently running nothing.
    pub async fn idle_count(&self) -> usize {
        let mut idle = 0;
        for slot in &self.executors {
            if slot.is_idle().await {
                idle += 1;
            }
        }
        idle
    }
}

/// A place where at most one run executes at a time.
#[derive(Debug)]
pub struct ExecutorSlot {
    node: String,
    number: usize,
    current: RwLock<Option<ExecutionHandle>>,
}

impl ExecutorSlot {
    fn new(node: String, number: usize) -> Self {
        Self {
            node,
            number,
            current: RwLock::new(None),
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn number(&self) -> usize {
        self.number
    }

    /// The execution this slot is running, if any.
    pub async fn current_executable(&self) -> Option<ExecutionHandle> {
        self.current.read().await.clone()
    }

    pub async fn is_idle(&self) -> bool {
        self.current.read().await.is_none()
    }

    /// Start a run in this slot. Returns `None` if the slot is busy.
    ///
    /// The handle is registered in the slot before this returns. The slot is
    /// released after the run's final record has been handed to the
    /// listener, and before waiters on the handle are woken.
    pub async fn try_launch(
        self: &Arc<Self>,
        request: BuildRequest,
        services: BuildServices,
    ) -> Option<ExecutionHandle> {
        let mut current = self.current.write().await;
        if current.is_some() {
            return None;
        }

        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(None);
        let job = request.job.clone();
        let number = request.number;
        let handle = ExecutionHandle::new(job.clone(), number, cancel.clone(), done_rx);
        *current = Some(handle.clone());
        drop(current);

        info!(
            job = %job,
            number,
            node = %self.node,
            slot = self.number,
            execution = %handle.id(),
            "Assigned run to executor"
        );

        let slot = Arc::clone(self);
        let id = *handle.id();
        tokio::spawn(async move {
            let build = tokio::spawn(runner::execute(request, services, cancel));
            let run = match build.await {
                Ok(run) => Some(run),
                Err(e) => {
                    error!(job = %job, number, error = %e, "Build task panicked");
                    None
                }
            };

            slot.release(&id).await;
            if let Some(run) = run {
                done_tx.send_replace(Some(run));
            }
        });

        Some(handle)
    }

    /// Clear the slot if it still holds the given execution.
    async fn release(&self, id: &ExecutionId) {
        let mut current = self.current.write().await;
        if current.as_ref().is_some_and(|h| h.id() == id) {
            *current = None;
        }
    }
}
