#![allow(dead_code)]

use conveyor_core::{Cause, Definition, ExecutionSink, JobConfig, JobName, Run, StorageBackend};
use conveyor_scheduler::OrchestrationContext;
use conveyor_scm::MemoryScm;
use conveyor_store::MemoryStorage;
use std::sync::Arc;
use std::time::Duration;

pub fn name(s: &str) -> JobName {
    JobName::new(s).unwrap()
}

pub fn inline_job(job: &str, script: &str) -> JobConfig {
    JobConfig::new(name(job)).with_definition(Definition::inline(script))
}

/// A started context with no quiet period, backed by `storage`.
pub async fn context_with(storage: Arc<MemoryStorage>, scm: Arc<MemoryScm>) -> OrchestrationContext {
    let ctx = OrchestrationContext::builder()
        .quiet_period(Duration::ZERO)
        .storage(storage.clone() as Arc<dyn StorageBackend>)
        .sink(storage as Arc<dyn ExecutionSink>)
        .scm_provider(scm)
        .build()
        .await
        .unwrap();
    ctx.start().await;
    ctx
}

pub async fn context() -> OrchestrationContext {
    context_with(Arc::new(MemoryStorage::new()), Arc::new(MemoryScm::new())).await
}

/// Log lines of a run, content only.
pub async fn log_of(ctx: &OrchestrationContext, job: &JobName, number: u64) -> Vec<String> {
    ctx.sink()
        .read(job, number)
        .await
        .unwrap()
        .into_iter()
        .map(|l| l.content)
        .collect()
}

/// Wait until a run's log contains a line, failing after five seconds.
pub async fn wait_for_log(ctx: &OrchestrationContext, job: &JobName, number: u64, line: &str) {
    let wait = async {
        loop {
            if log_of(ctx, job, number).await.iter().any(|l| l == line) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .unwrap_or_else(|_| panic!("log of {job}#{number} never showed {line:?}"));
}

/// Schedule a CLI build and wait for it to finish.
pub async fn build(ctx: &OrchestrationContext, job: &JobName) -> Arc<Run> {
    ctx.schedule(job, Cause::Cli)
        .await
        .unwrap()
        .expect("job is disabled")
        .wait()
        .await
        .expect("build never finished")
}
