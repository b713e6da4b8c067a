//! Deleting jobs with runs in flight.

mod common;

use common::{context, context_with, inline_job, log_of, name, wait_for_log};
use conveyor_core::{Cause, Error, RunStatus, StorageBackend};
use conveyor_scheduler::Lifecycle;
use conveyor_scm::MemoryScm;
use conveyor_store::MemoryStorage;
use std::sync::Arc;
use std::time::{Duration, Instant};

const CLEANUP_SCRIPT: &str = r#"
try {
    echo "working"
    sleep 999
}
catch {
    echo "cleaning up"
    sleep ms=1500
    echo "cleaned up"
}
"#;

#[tokio::test]
async fn test_delete_waits_for_cleanup_to_finish() {
    let ctx = context().await;
    let job = ctx
        .create_job(inline_job("p", CLEANUP_SCRIPT))
        .await
        .unwrap();

    let handle = ctx
        .schedule(job.name(), Cause::Cli)
        .await
        .unwrap()
        .unwrap()
        .wait_for_start()
        .await
        .unwrap();
    wait_for_log(&ctx, job.name(), 1, "working").await;

    let started = Instant::now();
    ctx.delete_job(job.name()).await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(1400));
    assert!(!handle.is_executing());
    assert_eq!(job.lifecycle().await, Lifecycle::Deleted);
    assert!(ctx.job(&name("p")).await.is_none());

    for node in ctx.computers() {
        for slot in node.executors() {
            let current = slot.current_executable().await;
            assert!(current.is_none_or(|h| h.job() != job.name()));
        }
    }

    let run = handle.wait().await.unwrap();
    assert_eq!(run.status, RunStatus::Aborted);

    // Logs went with the job.
    assert!(log_of(&ctx, job.name(), 1).await.is_empty());
    assert!(ctx.schedule(job.name(), Cause::Cli).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_delete_drops_queued_request() {
    let ctx = context().await;
    let job = ctx.create_job(inline_job("p", "")).await.unwrap();
    let queued = ctx
        .schedule_with_quiet_period(job.name(), Cause::Cli, Some(Duration::from_secs(60)))
        .await
        .unwrap()
        .unwrap();

    ctx.delete_job(job.name()).await.unwrap();

    assert!(queued.wait_for_start().await.is_none());
    assert!(ctx.queue().is_empty().await);
    assert!(job.runs().numbers().await.is_empty());
}

#[tokio::test]
async fn test_name_can_be_reused_after_delete() {
    let ctx = context().await;
    let job = ctx.create_job(inline_job("p", "")).await.unwrap();
    common::build(&ctx, job.name()).await;
    ctx.delete_job(job.name()).await.unwrap();

    let job = ctx.create_job(inline_job("p", "")).await.unwrap();
    assert_eq!(common::build(&ctx, job.name()).await.number, 1);
}

#[tokio::test]
async fn test_delete_unknown_job_is_not_found() {
    let ctx = context().await;
    assert!(ctx.delete_job(&name("nope")).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_name_stays_reserved_while_delete_waits() {
    let storage = Arc::new(MemoryStorage::new());
    let ctx = context_with(storage.clone(), Arc::new(MemoryScm::new())).await;
    let job = ctx
        .create_job(inline_job("p", CLEANUP_SCRIPT))
        .await
        .unwrap();
    ctx.schedule(job.name(), Cause::Cli)
        .await
        .unwrap()
        .unwrap()
        .wait_for_start()
        .await
        .unwrap();
    wait_for_log(&ctx, job.name(), 1, "working").await;

    let deleting = {
        let ctx = ctx.clone();
        tokio::spawn(async move { ctx.delete_job(&name("p")).await })
    };
    wait_for_log(&ctx, job.name(), 1, "cleaning up").await;
    assert!(ctx.job(&name("p")).await.is_none());

    // A second delete finds nothing, and must not release the name.
    assert!(ctx.delete_job(&name("p")).await.unwrap_err().is_not_found());
    assert!(matches!(
        ctx.create_job(inline_job("p", "")).await,
        Err(Error::Conflict(_))
    ));

    deleting.await.unwrap().unwrap();
    assert!(storage.list_jobs().await.unwrap().is_empty());

    let job = ctx.create_job(inline_job("p", "")).await.unwrap();
    assert_eq!(storage.list_jobs().await.unwrap(), vec![job.name().clone()]);
}
