//! Job-level view of the SCMs a job currently uses.
//!
//! The view is the SCM snapshot of the most recent successful run. Failed
//! and aborted runs leave it alone; a successful run that checked out
//! nothing clears it. Until a successful run exists the job reports its
//! definition's own SCMs.

use crate::RunStore;
use conveyor_core::{Definition, Result, Run, ScmConfig};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone)]
enum Tracked {
    /// Not computed since the job was opened.
    Unknown,
    NoSuccessfulRun,
    FromRun { number: u64, scms: Vec<ScmConfig> },
}

/// Cached "current SCMs" of one job.
#[derive(Debug)]
pub struct ScmTracker {
    tracked: Mutex<Tracked>,
}

impl ScmTracker {
    pub fn new() -> Self {
        Self {
            tracked: Mutex::new(Tracked::Unknown),
        }
    }

    /// Fold a completed run into the view.
    pub async fn record_run(&self, run: &Run) {
        if !run.status.is_success() {
            return;
        }

        let mut tracked = self.tracked.lock().await;
        if let Tracked::FromRun { number, .. } = &*tracked {
            if *number > run.number {
                return;
            }
        }

        let scms = run.scms();
        debug!(job = %run.job, number = run.number, scms = scms.len(), "Updated current SCMs");
        *tracked = Tracked::FromRun {
            number: run.number,
            scms,
        };
    }

    /// The job's current SCMs. Loads at most the last successful run, once.
    pub async fn current_scms(
        &self,
        runs: &RunStore,
        definition: &Definition,
    ) -> Result<Vec<ScmConfig>> {
        let mut tracked = self.tracked.lock().await;

        if let Tracked::Unknown = &*tracked {
            *tracked = match runs.last_successful_run().await? {
                Some(run) => Tracked::FromRun {
                    number: run.number,
                    scms: run.scms(),
                },
                None => Tracked::NoSuccessfulRun,
            };
        }

        Ok(match &*tracked {
            Tracked::FromRun { scms, .. } => scms.clone(),
            Tracked::NoSuccessfulRun | Tracked::Unknown => definition.scms(),
        })
    }
}

impl Default for ScmTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStorage;
    use chrono::Utc;
    use conveyor_core::{JobName, Revision, RunStatus, ScmCheckout};
    use std::sync::Arc;

    fn job() -> JobName {
        JobName::new("p").unwrap()
    }

    fn run(number: u64, status: RunStatus, scms: &[ScmConfig]) -> Run {
        let mut run = Run::started(job(), number, vec![], Utc::now());
        run.status = status;
        run.checkouts = scms
            .iter()
            .map(|scm| ScmCheckout {
                scm: scm.clone(),
                revision: Revision::new("r1"),
            })
            .collect();
        run
    }

    #[tokio::test]
    async fn test_success_failure_then_empty_success() {
        let runs = RunStore::empty(job(), Arc::new(MemoryStorage::new()));
        let tracker = ScmTracker::new();
        let inline = Definition::inline("");

        assert!(tracker.current_scms(&runs, &inline).await.unwrap().is_empty());

        tracker
            .record_run(&run(1, RunStatus::Success, &[ScmConfig::Null]))
            .await;
        assert_eq!(
            tracker.current_scms(&runs, &inline).await.unwrap(),
            vec![ScmConfig::Null]
        );

        tracker.record_run(&run(2, RunStatus::Failure, &[])).await;
        assert_eq!(tracker.current_scms(&runs, &inline).await.unwrap().len(), 1);

        tracker.record_run(&run(3, RunStatus::Success, &[])).await;
        assert!(tracker.current_scms(&runs, &inline).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_definition_scms_before_first_success() {
        let runs = RunStore::empty(job(), Arc::new(MemoryStorage::new()));
        let tracker = ScmTracker::new();
        let def = Definition::from_scm(
            ScmConfig::Memory {
                repo: "sample".to_string(),
            },
            "build.kdl",
        );

        assert_eq!(tracker.current_scms(&runs, &def).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_older_success_does_not_override() {
        let runs = RunStore::empty(job(), Arc::new(MemoryStorage::new()));
        let tracker = ScmTracker::new();
        tracker
            .record_run(&run(5, RunStatus::Success, &[ScmConfig::Null]))
            .await;
        tracker.record_run(&run(4, RunStatus::Success, &[])).await;

        let scms = tracker
            .current_scms(&runs, &Definition::default())
            .await
            .unwrap();
        assert_eq!(scms, vec![ScmConfig::Null]);
    }

    #[tokio::test]
    async fn test_computed_once_from_storage() {
        let storage = Arc::new(MemoryStorage::new());
        let writer = RunStore::empty(job(), storage.clone());
        for status in [RunStatus::Success, RunStatus::Failure] {
            let n = writer.allocate_number().await.unwrap();
            let scms: &[ScmConfig] = if n == 1 { &[ScmConfig::Null] } else { &[] };
            writer.record(run(n, status, scms)).await.unwrap();
        }

        let runs = RunStore::open(job(), storage).await.unwrap();
        let tracker = ScmTracker::new();
        for _ in 0..3 {
            let scms = tracker
                .current_scms(&runs, &Definition::default())
                .await
                .unwrap();
            assert_eq!(scms, vec![ScmConfig::Null]);
        }
        assert_eq!(runs.loads(), 1);
    }
}
