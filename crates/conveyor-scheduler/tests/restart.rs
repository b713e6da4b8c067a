//! Run history across a controller restart.

mod common;

use common::{build, context_with, inline_job, name};
use conveyor_core::{ExecutionSink, RunStatus, StorageBackend};
use conveyor_scheduler::OrchestrationContext;
use conveyor_scm::MemoryScm;
use conveyor_store::{FsStorage, MemoryStorage};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_restart_loads_at_most_one_old_run() {
    let storage = Arc::new(MemoryStorage::new());
    let scm = Arc::new(MemoryScm::new());

    let before = context_with(storage.clone(), scm.clone()).await;
    let job = before.create_job(inline_job("p", "echo \"hi\"")).await.unwrap();
    for expected in 1..=10 {
        assert_eq!(build(&before, job.name()).await.number, expected);
    }
    before.shutdown().await;

    let after = context_with(storage, scm).await;
    let job = after.job(&name("p")).await.unwrap();
    assert_eq!(job.runs().loads(), 0);
    assert_eq!(job.last_run().await.unwrap().unwrap().number, 10);

    for expected in 11..=15 {
        let run = build(&after, job.name()).await;
        assert_eq!(run.number, expected);
        assert_eq!(run.status, RunStatus::Success);
    }

    assert_eq!(job.last_run().await.unwrap().unwrap().number, 15);
    assert!(job.runs().loads() <= 1);
    assert_eq!(job.runs().numbers().await.len(), 15);
}

async fn open(root: &Path) -> OrchestrationContext {
    let fs = Arc::new(FsStorage::new(root));
    let ctx = OrchestrationContext::builder()
        .quiet_period(Duration::ZERO)
        .storage(fs.clone() as Arc<dyn StorageBackend>)
        .sink(fs as Arc<dyn ExecutionSink>)
        .build()
        .await
        .unwrap();
    ctx.start().await;
    ctx
}

#[tokio::test]
async fn test_filesystem_backend_survives_restart() {
    let dir = tempfile::tempdir().unwrap();

    let before = open(dir.path()).await;
    let job = before
        .create_job(inline_job("p", "checkout \"null\""))
        .await
        .unwrap();
    build(&before, job.name()).await;
    build(&before, job.name()).await;
    before.shutdown().await;

    let after = open(dir.path()).await;
    let job = after.job(&name("p")).await.unwrap();
    assert_eq!(build(&after, job.name()).await.number, 3);
    assert_eq!(job.current_scms().await.unwrap().len(), 1);
    assert_eq!(job.runs().loads(), 0);
}
