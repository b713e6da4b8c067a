//! Job management commands.

use super::job_name;
use anyhow::{Context, Result};
use conveyor_config::parse_job;
use conveyor_scheduler::OrchestrationContext;
use std::path::Path;

pub async fn create(ctx: &OrchestrationContext, path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read job file: {}", path.display()))?;
    let config = parse_job(&content)
        .with_context(|| format!("Failed to parse job file: {}", path.display()))?;

    let job = ctx.create_job(config).await?;
    println!("Created job {}", job.name());
    Ok(())
}

pub async fn enable(ctx: &OrchestrationContext, names: &[String]) -> Result<()> {
    let names = names
        .iter()
        .map(|n| job_name(n))
        .collect::<Result<Vec<_>>>()?;
    ctx.enable_jobs(&names).await?;
    for name in &names {
        println!("Enabled {}", name);
    }
    Ok(())
}

pub async fn disable(ctx: &OrchestrationContext, name: &str) -> Result<()> {
    let name = job_name(name)?;
    ctx.set_enabled(&name, false).await?;
    println!("Disabled {}", name);
    Ok(())
}

pub async fn status(ctx: &OrchestrationContext, name: &str) -> Result<()> {
    let status = ctx.status(&job_name(name)?).await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

pub async fn delete(ctx: &OrchestrationContext, name: &str) -> Result<()> {
    let name = job_name(name)?;
    ctx.delete_job(&name).await?;
    println!("Deleted {}", name);
    Ok(())
}
