//! Scheduling, enablement and the dispatcher.

mod common;

use common::{build, context, inline_job, name};
use conveyor_core::{Cause, JobStatusView, RunStatus};
use std::time::Duration;

#[tokio::test]
async fn test_disabled_job_is_not_scheduled() {
    let ctx = context().await;
    let job = ctx.create_job(inline_job("p", "")).await.unwrap();

    ctx.set_enabled(job.name(), false).await.unwrap();
    assert!(ctx.schedule(job.name(), Cause::Cli).await.unwrap().is_none());
    assert_eq!(
        ctx.status(job.name()).await.unwrap(),
        JobStatusView {
            disabled: true,
            buildable: false
        }
    );

    ctx.enable_jobs(&[name("p")]).await.unwrap();
    let status = ctx.status(job.name()).await.unwrap();
    assert_eq!(
        serde_json::to_string(&status).unwrap(),
        r#"{"disabled":false,"buildable":true}"#
    );

    // Enabling an enabled job is fine.
    ctx.enable_jobs(&[name("p")]).await.unwrap();

    let run = build(&ctx, job.name()).await;
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.number, 1);
}

#[tokio::test]
async fn test_disabling_drops_waiting_request() {
    let ctx = context().await;
    let job = ctx.create_job(inline_job("p", "")).await.unwrap();

    let handle = ctx
        .schedule_with_quiet_period(job.name(), Cause::Cli, Some(Duration::from_secs(60)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ctx.queue().len().await, 1);

    ctx.set_enabled(job.name(), false).await.unwrap();
    assert!(handle.wait_for_start().await.is_none());
    assert!(ctx.queue().is_empty().await);
}

#[tokio::test]
async fn test_requests_coalesce_during_quiet_period() {
    let ctx = context().await;
    let job = ctx.create_job(inline_job("p", "")).await.unwrap();

    let quiet = Some(Duration::from_millis(200));
    let first = ctx
        .schedule_with_quiet_period(job.name(), Cause::Manual { user: Some("alice".into()) }, quiet)
        .await
        .unwrap()
        .unwrap();
    let second = ctx
        .schedule_with_quiet_period(job.name(), Cause::Cli, quiet)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.id(), second.id());

    let run = second.wait().await.unwrap();
    assert_eq!(run.number, 1);
    assert_eq!(run.causes.len(), 2);

    ctx.wait_until_idle().await;
    assert_eq!(job.runs().numbers().await, vec![1]);
}

#[tokio::test]
async fn test_non_concurrent_job_runs_one_at_a_time() {
    let ctx = context().await;
    let job = ctx
        .create_job(inline_job("p", "sleep ms=300"))
        .await
        .unwrap();

    let first = ctx.schedule(job.name(), Cause::Cli).await.unwrap().unwrap();
    let running = first.wait_for_start().await.unwrap();
    let second = ctx.schedule(job.name(), Cause::Cli).await.unwrap().unwrap();
    assert_ne!(first.id(), second.id());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(running.is_executing());
    assert_eq!(job.running().await.len(), 1);
    assert_eq!(ctx.queue().len().await, 1);

    let one = first.wait().await.unwrap();
    let two = second.wait().await.unwrap();
    assert_eq!((one.number, two.number), (1, 2));
    assert!(two.started_at.unwrap() >= one.finished_at.unwrap());
}

#[tokio::test]
async fn test_concurrent_job_uses_several_slots() {
    let ctx = context().await;
    let mut config = inline_job("p", "sleep ms=300");
    config.concurrent_builds = true;
    let job = ctx.create_job(config).await.unwrap();

    let first = ctx.schedule(job.name(), Cause::Cli).await.unwrap().unwrap();
    first.wait_for_start().await.unwrap();
    let second = ctx.schedule(job.name(), Cause::Cli).await.unwrap().unwrap();
    second.wait_for_start().await.unwrap();

    assert_eq!(job.running().await.len(), 2);
    let busy = ctx.computers()[0].idle_count().await;
    assert_eq!(busy, 0);

    ctx.wait_until_idle().await;
    assert_eq!(job.runs().numbers().await, vec![2, 1]);
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let ctx = context().await;
    let err = ctx.schedule(&name("nope"), Cause::Cli).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_duplicate_job_is_a_conflict() {
    let ctx = context().await;
    ctx.create_job(inline_job("p", "")).await.unwrap();
    assert!(ctx.create_job(inline_job("p", "")).await.is_err());
}

#[tokio::test]
async fn test_zero_tick_interval_is_rejected() {
    let result = conveyor_scheduler::OrchestrationContext::builder()
        .config(conveyor_config::SystemConfig {
            tick_interval: Duration::ZERO,
            ..Default::default()
        })
        .build()
        .await;
    assert!(matches!(result, Err(conveyor_core::Error::InvalidInput(_))));
}
