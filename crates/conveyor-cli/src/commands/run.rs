//! Build and poll commands.

use super::job_name;
use anyhow::{Context, Result};
use conveyor_core::{Cause, JobName, LogStream, Run};
use conveyor_scheduler::{OrchestrationContext, PollOutcome};
use std::time::Duration;

/// Run one build of a job to completion and print its log.
pub async fn build(ctx: &OrchestrationContext, name: &str) -> Result<()> {
    let name = job_name(name)?;
    let handle = ctx
        .schedule_with_quiet_period(&name, Cause::Cli, Some(Duration::ZERO))
        .await?
        .with_context(|| format!("Job {} is disabled", name))?;

    let run = handle
        .wait()
        .await
        .context("Build was cancelled before it finished")?;
    finish(ctx, &name, &run).await
}

/// Poll a job and, if that scheduled a build, wait for it.
pub async fn poll(ctx: &OrchestrationContext, name: &str) -> Result<()> {
    let name = job_name(name)?;
    match ctx.poll(&name).await? {
        PollOutcome::Scheduled(handle) => {
            println!("Changes found; building {}", name);
            let run = handle
                .wait()
                .await
                .context("Build was cancelled before it finished")?;
            finish(ctx, &name, &run).await
        }
        PollOutcome::NoChanges => {
            println!("No changes");
            Ok(())
        }
        PollOutcome::AlreadyPending => {
            println!("A build from an earlier poll is still pending");
            Ok(())
        }
        PollOutcome::NotPolled => {
            println!("Job {} has no scm-poll trigger", name);
            Ok(())
        }
        PollOutcome::Disabled => {
            println!("Job {} is disabled", name);
            Ok(())
        }
    }
}

async fn finish(ctx: &OrchestrationContext, name: &JobName, run: &Run) -> Result<()> {
    println!("\n--- {} #{} ---\n", name, run.number);
    for line in ctx.sink().read(name, run.number).await? {
        let marker = match line.stream {
            LogStream::Stdout => " ",
            LogStream::Stderr => "!",
            LogStream::System => "*",
        };
        println!("{} {}", marker, line.content);
    }

    if run.status.is_success() {
        println!("\n✓ Build succeeded");
        Ok(())
    } else {
        anyhow::bail!("Build {:?}", run.status);
    }
}
