//! CLI command implementations.

pub mod jobs;
pub mod run;
pub mod runs;

use anyhow::{Context, Result};
use conveyor_config::{SystemConfig, parse_script, parse_system_config};
use conveyor_core::{ExecutionSink, JobName, StorageBackend};
use conveyor_scheduler::OrchestrationContext;
use conveyor_scm::ScmRegistry;
use conveyor_store::FsStorage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const DEFAULT_DATA_DIR: &str = ".conveyor";

/// Open and start a context over the filesystem data directory.
pub async fn open_context(
    data_dir: Option<&Path>,
    config_path: Option<&Path>,
) -> Result<OrchestrationContext> {
    let config = match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            parse_system_config(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        }
        None => SystemConfig::default(),
    };

    let data_dir = data_dir
        .map(Path::to_path_buf)
        .or_else(|| config.data_dir.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
    debug!(data_dir = %data_dir.display(), "Opening data directory");
    let storage = Arc::new(FsStorage::new(&data_dir));

    let ctx = OrchestrationContext::builder()
        .config(config)
        .storage(storage.clone() as Arc<dyn StorageBackend>)
        .sink(storage as Arc<dyn ExecutionSink>)
        .scms(ScmRegistry::with_defaults())
        .build()
        .await
        .with_context(|| format!("Failed to open data directory: {}", data_dir.display()))?;
    ctx.start().await;
    Ok(ctx)
}

pub(crate) fn job_name(name: &str) -> Result<JobName> {
    JobName::new(name).with_context(|| format!("Invalid job name: {}", name))
}

pub fn validate(path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read script: {}", path.display()))?;
    match parse_script(&content) {
        Ok(script) => {
            println!("Script is valid ({} steps)", script.steps.len());
            Ok(())
        }
        Err(e) => {
            println!("Script error: {}", e);
            std::process::exit(1);
        }
    }
}
