//! In-memory build queue.
//!
//! Holds schedule requests until the dispatcher assigns them to a slot.
//! There is at most one waiting item per job; later requests for the same
//! job are folded into it.

use chrono::{DateTime, Utc};
use conveyor_core::{Cause, JobName, Run};
use conveyor_executor::ExecutionHandle;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, Notify, watch};
use tokio::time::Instant;
use tracing::debug;

/// Where a queue item is in its life.
#[derive(Debug, Clone)]
pub enum ItemState {
    Waiting,
    Started(ExecutionHandle),
    Cancelled,
}

/// A waiting schedule request.
#[derive(Debug)]
pub(crate) struct QueueItem {
    pub id: u64,
    pub job: JobName,
    pub causes: Vec<Cause>,
    pub queued_at: DateTime<Utc>,
    pub due: Instant,
    state: watch::Sender<ItemState>,
}

impl QueueItem {
    pub fn start(self, handle: ExecutionHandle) {
        self.state.send_replace(ItemState::Started(handle));
    }

    pub fn cancel(self) {
        self.state.send_replace(ItemState::Cancelled);
    }

    fn handle(&self) -> ScheduleHandle {
        ScheduleHandle {
            id: self.id,
            job: self.job.clone(),
            state: self.state.subscribe(),
        }
    }
}

/// Returned by a successful schedule request. Resolves to the execution
/// once the request has been picked up.
#[derive(Debug, Clone)]
pub struct ScheduleHandle {
    id: u64,
    job: JobName,
    state: watch::Receiver<ItemState>,
}

impl ScheduleHandle {
    /// Queue item ID. Coalesced requests share it.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn job(&self) -> &JobName {
        &self.job
    }

    pub fn state(&self) -> ItemState {
        self.state.borrow().clone()
    }

    /// Wait until the request is assigned to a slot. `None` if it was
    /// cancelled instead.
    pub async fn wait_for_start(&self) -> Option<ExecutionHandle> {
        let mut rx = self.state.clone();
        let state = rx
            .wait_for(|s| !matches!(s, ItemState::Waiting))
            .await
            .ok()?;
        match &*state {
            ItemState::Started(handle) => Some(handle.clone()),
            _ => None,
        }
    }

    /// Wait for the run to start and then to finish.
    pub async fn wait(&self) -> Option<Arc<Run>> {
        self.wait_for_start().await?.wait().await
    }
}

/// FIFO queue of schedule requests.
#[derive(Debug)]
pub struct BuildQueue {
    items: Mutex<VecDeque<QueueItem>>,
    next_id: AtomicU64,
    notify: Notify,
}

impl BuildQueue {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            next_id: AtomicU64::new(1),
            notify: Notify::new(),
        }
    }

    /// Add a request, or fold it into the job's waiting item. A folded
    /// request keeps the earlier of the two due times.
    pub async fn enqueue(&self, job: &JobName, cause: Cause, due: Instant) -> ScheduleHandle {
        let mut items = self.items.lock().await;

        if let Some(item) = items.iter_mut().find(|item| item.job == *job) {
            if !item.causes.contains(&cause) {
                item.causes.push(cause);
            }
            item.due = item.due.min(due);
            debug!(job = %job, item = item.id, "Coalesced schedule request");
            let handle = item.handle();
            drop(items);
            self.notify.notify_one();
            return handle;
        }

        let (state, _) = watch::channel(ItemState::Waiting);
        let item = QueueItem {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            job: job.clone(),
            causes: vec![cause],
            queued_at: Utc::now(),
            due,
            state,
        };
        debug!(job = %job, item = item.id, "Enqueued build");
        let handle = item.handle();
        items.push_back(item);
        drop(items);

        self.notify.notify_one();
        handle
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }

    /// Causes of the job's waiting item, empty if none is waiting.
    pub async fn pending_causes(&self, job: &JobName) -> Vec<Cause> {
        self.items
            .lock()
            .await
            .iter()
            .find(|item| item.job == *job)
            .map(|item| item.causes.clone())
            .unwrap_or_default()
    }

    /// Drop the job's waiting item. Returns how many were removed.
    pub async fn cancel_for_job(&self, job: &JobName) -> usize {
        let mut items = self.items.lock().await;
        let (cancelled, kept): (Vec<_>, Vec<_>) =
            items.drain(..).partition(|item| item.job == *job);
        *items = kept.into();
        drop(items);

        let count = cancelled.len();
        for item in cancelled {
            debug!(job = %job, item = item.id, "Cancelled queue item");
            item.cancel();
        }
        count
    }

    /// Drop every waiting item.
    pub(crate) async fn cancel_all(&self) -> usize {
        let cancelled: Vec<_> = self.items.lock().await.drain(..).collect();
        let count = cancelled.len();
        for item in cancelled {
            item.cancel();
        }
        count
    }

    /// Items whose quiet period has elapsed, oldest first.
    pub(crate) async fn due(&self, now: Instant) -> Vec<(u64, JobName)> {
        self.items
            .lock()
            .await
            .iter()
            .filter(|item| item.due <= now)
            .map(|item| (item.id, item.job.clone()))
            .collect()
    }

    /// Earliest due time still in the future.
    pub(crate) async fn next_due_after(&self, now: Instant) -> Option<Instant> {
        self.items
            .lock()
            .await
            .iter()
            .map(|item| item.due)
            .filter(|due| *due > now)
            .min()
    }

    pub(crate) async fn take(&self, id: u64) -> Option<QueueItem> {
        let mut items = self.items.lock().await;
        let index = items.iter().position(|item| item.id == id)?;
        items.remove(index)
    }

    /// Put a taken item back in its original position.
    pub(crate) async fn restore(&self, item: QueueItem) {
        let mut items = self.items.lock().await;
        let index = items
            .iter()
            .position(|other| other.id > item.id)
            .unwrap_or(items.len());
        items.insert(index, item);
    }

    /// Wake the dispatcher.
    pub(crate) fn notify(&self) {
        self.notify.notify_one();
    }

    pub(crate) async fn notified(&self) {
        self.notify.notified().await;
    }
}

impl Default for BuildQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn job(name: &str) -> JobName {
        JobName::new(name).unwrap()
    }

    #[tokio::test]
    async fn test_requests_for_same_job_coalesce() {
        let queue = BuildQueue::new();
        let now = Instant::now();
        let first = queue
            .enqueue(&job("p"), Cause::Manual { user: None }, now + Duration::from_secs(5))
            .await;
        let second = queue.enqueue(&job("p"), Cause::Cli, now).await;
        queue.enqueue(&job("p"), Cause::Cli, now).await;

        assert_eq!(first.id(), second.id());
        assert_eq!(queue.len().await, 1);
        assert_eq!(
            queue.pending_causes(&job("p")).await,
            vec![Cause::Manual { user: None }, Cause::Cli]
        );
        assert_eq!(queue.due(now).await.len(), 1);
    }

    #[tokio::test]
    async fn test_due_items_are_fifo_and_future_items_wait() {
        let queue = BuildQueue::new();
        let now = Instant::now();
        queue.enqueue(&job("a"), Cause::Cli, now).await;
        queue
            .enqueue(&job("b"), Cause::Cli, now + Duration::from_secs(60))
            .await;
        queue.enqueue(&job("c"), Cause::Cli, now).await;

        let due: Vec<_> = queue.due(now).await.into_iter().map(|(_, j)| j).collect();
        assert_eq!(due, vec![job("a"), job("c")]);
        assert_eq!(
            queue.next_due_after(now).await,
            Some(now + Duration::from_secs(60))
        );
    }

    #[tokio::test]
    async fn test_cancel_resolves_waiters() {
        let queue = BuildQueue::new();
        let handle = queue.enqueue(&job("p"), Cause::Cli, Instant::now()).await;
        queue.enqueue(&job("q"), Cause::Cli, Instant::now()).await;

        assert_eq!(queue.cancel_for_job(&job("p")).await, 1);
        assert!(handle.wait_for_start().await.is_none());
        assert!(matches!(handle.state(), ItemState::Cancelled));
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_restore_keeps_order() {
        let queue = BuildQueue::new();
        let now = Instant::now();
        let a = queue.enqueue(&job("a"), Cause::Cli, now).await;
        queue.enqueue(&job("b"), Cause::Cli, now).await;

        let item = queue.take(a.id()).await.unwrap();
        queue.restore(item).await;

        let due: Vec<_> = queue.due(now).await.into_iter().map(|(_, j)| j).collect();
        assert_eq!(due, vec![job("a"), job("b")]);
    }
}
