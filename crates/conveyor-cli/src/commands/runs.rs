//! Run history commands.

use super::job_name;
use anyhow::{Context, Result};
use conveyor_scheduler::OrchestrationContext;

pub async fn list(ctx: &OrchestrationContext, name: &str) -> Result<()> {
    let name = job_name(name)?;
    let job = ctx
        .job(&name)
        .await
        .with_context(|| format!("Job not found: {}", name))?;

    let runs = job.runs().runs().await?;
    if runs.is_empty() {
        println!("No runs");
        return Ok(());
    }

    println!("{:<6} {:<10} {:<20} CAUSE", "RUN", "STATUS", "STARTED");
    for run in runs {
        let started = run
            .started_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        let cause = run
            .causes
            .first()
            .map(|c| c.to_string())
            .unwrap_or_default();
        println!(
            "{:<6} {:<10} {:<20} {}",
            format!("#{}", run.number),
            format!("{:?}", run.status).to_lowercase(),
            started,
            cause
        );
    }
    Ok(())
}
