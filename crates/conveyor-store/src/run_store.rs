//! Lazily loaded run history for one job.
//!
//! The store knows every run number from the cheap `list_runs` call and the
//! notable runs from the persisted permalinks. Full records are loaded only
//! when asked for, once per number; concurrent readers of the same number
//! share a single load.

use chrono::Utc;
use conveyor_core::{Error, JobName, Permalinks, Result, Run, RunStatus, StorageBackend};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, warn};

type RunCell = Arc<OnceCell<Arc<Run>>>;

struct RunIndex {
    numbers: BTreeSet<u64>,
    cells: HashMap<u64, RunCell>,
    permalinks: Permalinks,
    next_number: u64,
}

/// Run history of a single job.
pub struct RunStore {
    job: JobName,
    backend: Arc<dyn StorageBackend>,
    index: RwLock<RunIndex>,
    loads: AtomicUsize,
}

impl RunStore {
    /// Open the history of an existing job, reading only its metadata.
    pub async fn open(job: JobName, backend: Arc<dyn StorageBackend>) -> Result<Self> {
        let numbers: BTreeSet<u64> = backend.list_runs(&job).await?.into_iter().collect();
        let permalinks = backend.load_permalinks(&job).await?;
        let persisted_next = backend.next_build_number(&job).await?;

        // A run directory beyond the persisted high-water mark still wins.
        let next_number = numbers
            .last()
            .map(|n| persisted_next.max(n + 1))
            .unwrap_or(persisted_next);

        debug!(job = %job, runs = numbers.len(), next_number, "Opened run history");

        let interrupted: Vec<u64> = permalinks.in_progress.iter().copied().collect();
        let store = Self::with_index(
            job,
            backend,
            RunIndex {
                numbers,
                cells: HashMap::new(),
                permalinks,
                next_number,
            },
        );
        for number in interrupted {
            store.abort_interrupted(number).await?;
        }
        Ok(store)
    }

    /// Mark a run left in progress by an earlier process as aborted.
    async fn abort_interrupted(&self, number: u64) -> Result<()> {
        let run = match self.get_run(number).await {
            Ok(run) => run,
            Err(Error::NotFound(_)) => {
                let mut index = self.index.write().await;
                index.permalinks.in_progress.remove(&number);
                return self
                    .backend
                    .save_permalinks(&self.job, &index.permalinks)
                    .await;
            }
            Err(e) => return Err(e),
        };

        let mut run = (*run).clone();
        if !run.is_complete() {
            run.status = RunStatus::Aborted;
            run.message = Some("interrupted by controller restart".to_string());
            run.finished_at = Some(Utc::now());
            warn!(job = %self.job, number, "Marking interrupted run as aborted");
        }
        self.record(run).await.map(|_| ())
    }

    /// History of a job that has never run.
    pub fn empty(job: JobName, backend: Arc<dyn StorageBackend>) -> Self {
        Self::with_index(
            job,
            backend,
            RunIndex {
                numbers: BTreeSet::new(),
                cells: HashMap::new(),
                permalinks: Permalinks::default(),
                next_number: 1,
            },
        )
    }

    fn with_index(job: JobName, backend: Arc<dyn StorageBackend>, index: RunIndex) -> Self {
        Self {
            job,
            backend,
            index: RwLock::new(index),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn job(&self) -> &JobName {
        &self.job
    }

    /// Number of full run records loaded from storage so far.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Hand out the next run number. The new high-water mark is persisted
    /// before the number is returned, so a number is never reused.
    pub async fn allocate_number(&self) -> Result<u64> {
        let mut index = self.index.write().await;
        let number = index.next_number;
        self.backend
            .save_next_build_number(&self.job, number + 1)
            .await?;
        index.next_number = number + 1;
        Ok(number)
    }

    /// The number `allocate_number` would return next.
    pub async fn next_number(&self) -> u64 {
        self.index.read().await.next_number
    }

    /// Persist a run (started or completed) and make it the cached record.
    pub async fn record(&self, run: Run) -> Result<Arc<Run>> {
        if run.job != self.job {
            return Err(Error::InvalidInput(format!(
                "run of job {} recorded in history of {}",
                run.job, self.job
            )));
        }

        self.backend.save_run(&run).await?;

        let run = Arc::new(run);
        let mut index = self.index.write().await;
        index.numbers.insert(run.number);
        index.cells.insert(
            run.number,
            Arc::new(OnceCell::new_with(Some(Arc::clone(&run)))),
        );

        let before = index.permalinks.clone();
        index.permalinks.record(run.number, run.status);
        if index.permalinks != before {
            self.backend
                .save_permalinks(&self.job, &index.permalinks)
                .await?;
        }

        Ok(run)
    }

    /// Load one run, from cache if possible.
    pub async fn get_run(&self, number: u64) -> Result<Arc<Run>> {
        let cell = {
            let mut index = self.index.write().await;
            if !index.numbers.contains(&number) {
                return Err(Error::NotFound(format!("run {}#{}", self.job, number)));
            }
            Arc::clone(index.cells.entry(number).or_default())
        };

        let run = cell
            .get_or_try_init(|| async {
                self.loads.fetch_add(1, Ordering::SeqCst);
                debug!(job = %self.job, number, "Loading run record");
                self.backend.load_run(&self.job, number).await.map(Arc::new)
            })
            .await?;

        Ok(Arc::clone(run))
    }

    /// The most recent run, started or completed.
    pub async fn last_run(&self) -> Result<Option<Arc<Run>>> {
        let last = self.index.read().await.numbers.last().copied();
        match last {
            Some(number) => self.get_run(number).await.map(Some),
            None => Ok(None),
        }
    }

    /// The most recent run with a terminal status.
    pub async fn last_completed_run(&self) -> Result<Option<Arc<Run>>> {
        let last = self.index.read().await.permalinks.last_completed;
        self.get_permalink(last).await
    }

    /// The most recent successful run.
    pub async fn last_successful_run(&self) -> Result<Option<Arc<Run>>> {
        let last = self.index.read().await.permalinks.last_successful;
        self.get_permalink(last).await
    }

    async fn get_permalink(&self, number: Option<u64>) -> Result<Option<Arc<Run>>> {
        match number {
            Some(number) => self.get_run(number).await.map(Some),
            None => Ok(None),
        }
    }

    /// All run numbers, most recent first.
    pub async fn numbers(&self) -> Vec<u64> {
        self.index.read().await.numbers.iter().rev().copied().collect()
    }

    /// Every run, most recent first. Loads each record not yet cached.
    pub async fn runs(&self) -> Result<Vec<Arc<Run>>> {
        let mut runs = Vec::new();
        for number in self.numbers().await {
            runs.push(self.get_run(number).await?);
        }
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStorage;

    fn job() -> JobName {
        JobName::new("p").unwrap()
    }

    fn completed(number: u64, status: RunStatus) -> Run {
        let mut run = Run::started(job(), number, vec![], Utc::now());
        run.status = status;
        run.finished_at = Some(Utc::now());
        run
    }

    async fn seeded(count: u64) -> Arc<MemoryStorage> {
        let storage = Arc::new(MemoryStorage::new());
        let store = RunStore::empty(job(), storage.clone());
        for _ in 0..count {
            let n = store.allocate_number().await.unwrap();
            store.record(completed(n, RunStatus::Success)).await.unwrap();
        }
        storage
    }

    #[tokio::test]
    async fn test_numbers_are_monotonic_across_reopen() {
        let storage = seeded(3).await;

        let store = RunStore::open(job(), storage.clone()).await.unwrap();
        assert_eq!(store.allocate_number().await.unwrap(), 4);
        assert_eq!(store.allocate_number().await.unwrap(), 5);

        // Number 5 was handed out but never recorded; it is still not reused.
        let reopened = RunStore::open(job(), storage).await.unwrap();
        assert_eq!(reopened.next_number().await, 6);
    }

    #[tokio::test]
    async fn test_last_run_loads_only_that_run_once() {
        let storage = seeded(10).await;
        let store = RunStore::open(job(), storage).await.unwrap();
        assert_eq!(store.loads(), 0);

        for _ in 0..5 {
            let last = store.last_run().await.unwrap().unwrap();
            assert_eq!(last.number, 10);
        }

        assert_eq!(store.loads(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_readers_share_one_load() {
        let storage = seeded(2).await;
        let store = Arc::new(RunStore::open(job(), storage).await.unwrap());

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.get_run(1).await.unwrap().number })
            })
            .collect();
        for reader in readers {
            assert_eq!(reader.await.unwrap(), 1);
        }

        assert_eq!(store.loads(), 1);
    }

    #[tokio::test]
    async fn test_recorded_runs_need_no_load() {
        let storage = Arc::new(MemoryStorage::new());
        let store = RunStore::empty(job(), storage);
        let n = store.allocate_number().await.unwrap();
        store.record(completed(n, RunStatus::Failure)).await.unwrap();

        let last = store.last_run().await.unwrap().unwrap();
        assert_eq!(last.status, RunStatus::Failure);
        assert!(store.last_successful_run().await.unwrap().is_none());
        assert_eq!(store.last_completed_run().await.unwrap().unwrap().number, 1);
        assert_eq!(store.loads(), 0);
    }

    #[tokio::test]
    async fn test_missing_number_is_not_found() {
        let storage = seeded(1).await;
        let store = RunStore::open(job(), storage).await.unwrap();
        assert!(store.get_run(7).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_permalinks_survive_reopen() {
        let storage = Arc::new(MemoryStorage::new());
        let store = RunStore::empty(job(), storage.clone());
        for status in [RunStatus::Success, RunStatus::Failure, RunStatus::Aborted] {
            let n = store.allocate_number().await.unwrap();
            store.record(completed(n, status)).await.unwrap();
        }

        let reopened = RunStore::open(job(), storage).await.unwrap();
        let successful = reopened.last_successful_run().await.unwrap().unwrap();
        assert_eq!(successful.number, 1);
        assert_eq!(reopened.loads(), 1);
        assert_eq!(reopened.numbers().await, vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn test_reopen_aborts_runs_left_running() {
        let storage = seeded(2).await;
        let store = RunStore::open(job(), storage.clone()).await.unwrap();
        let n = store.allocate_number().await.unwrap();
        store
            .record(Run::started(job(), n, vec![], Utc::now()))
            .await
            .unwrap();
        drop(store);

        let reopened = RunStore::open(job(), storage.clone()).await.unwrap();
        let last = reopened.last_run().await.unwrap().unwrap();
        assert_eq!(last.number, 3);
        assert_eq!(last.status, RunStatus::Aborted);
        assert!(last.finished_at.is_some());
        assert_eq!(
            reopened.last_completed_run().await.unwrap().unwrap().number,
            3
        );
        assert_eq!(reopened.last_successful_run().await.unwrap().unwrap().number, 2);

        let again = RunStore::open(job(), storage).await.unwrap();
        assert_eq!(again.last_run().await.unwrap().unwrap().status, RunStatus::Aborted);
        assert_eq!(again.loads(), 1);
    }
}
