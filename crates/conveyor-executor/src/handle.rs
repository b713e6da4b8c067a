//! Handles on in-flight runs.

use conveyor_core::{ExecutionId, JobName, Run};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// A cancellable view of one in-flight run. Cheap to clone; every clone
/// observes the same execution.
#[derive(Debug, Clone)]
pub struct ExecutionHandle {
    id: ExecutionId,
    job: JobName,
    number: u64,
    cancel: CancellationToken,
    done: watch::Receiver<Option<Arc<Run>>>,
}

impl ExecutionHandle {
    pub(crate) fn new(
        job: JobName,
        number: u64,
        cancel: CancellationToken,
        done: watch::Receiver<Option<Arc<Run>>>,
    ) -> Self {
        Self {
            id: ExecutionId::new(),
            job,
            number,
            cancel,
            done,
        }
    }

    pub fn id(&self) -> &ExecutionId {
        &self.id
    }

    pub fn job(&self) -> &JobName {
        &self.job
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    /// Ask the run to stop. Returns immediately; use `wait` to observe the stop.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether the run is still doing work.
    pub fn is_executing(&self) -> bool {
        // A closed channel without a result means the task is gone.
        let finished = self.done.borrow().is_some();
        !finished && self.done.has_changed().is_ok()
    }

    /// Wait until the run has stopped and its record is final. `None` if the
    /// execution task vanished without producing a record.
    pub async fn wait(&self) -> Option<Arc<Run>> {
        let mut done = self.done.clone();
        done.wait_for(|run| run.is_some())
            .await
            .ok()
            .and_then(|run| (*run).clone())
    }
}
