//! Dispatcher that assigns queued builds to free executor slots.

use crate::OrchestrationContext;
use crate::job::{Job, Lifecycle, RunningBuild};
use conveyor_executor::{BuildRequest, ExecutorSlot};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Upper bound on how long the dispatcher sleeps without a wake-up.
const IDLE_WAIT: Duration = Duration::from_secs(60);

/// Run the dispatch loop until cancelled.
pub(crate) async fn run(ctx: OrchestrationContext, cancel: CancellationToken) {
    info!("Starting dispatcher");

    loop {
        let next_due = dispatch_due(&ctx).await;
        let wake_at = next_due.unwrap_or_else(|| Instant::now() + IDLE_WAIT);

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ctx.inner.queue.notified() => {}
            _ = tokio::time::sleep_until(wake_at) => {}
        }
    }

    info!("Dispatcher stopped");
}

/// Start every due item that can start now, in FIFO order. Returns when the
/// next not-yet-due item becomes due.
async fn dispatch_due(ctx: &OrchestrationContext) -> Option<Instant> {
    let now = Instant::now();

    for (id, name) in ctx.inner.queue.due(now).await {
        let Some(slot) = idle_slot(ctx).await else {
            debug!("No idle executor; waiting for a run to finish");
            break;
        };

        let Some(job) = ctx.job(&name).await else {
            // Deleted since it was queued.
            if let Some(item) = ctx.inner.queue.take(id).await {
                item.cancel();
            }
            continue;
        };

        start_item(ctx, &job, id, slot).await;
    }

    ctx.inner.queue.next_due_after(now).await
}

async fn idle_slot(ctx: &OrchestrationContext) -> Option<Arc<ExecutorSlot>> {
    for node in ctx.computers() {
        for slot in node.executors() {
            if slot.is_idle().await {
                return Some(slot.clone());
            }
        }
    }
    None
}

/// Start one queue item under the job's lock. Leaves the item queued if the
/// job cannot run right now.
async fn start_item(ctx: &OrchestrationContext, job: &Arc<Job>, id: u64, slot: Arc<ExecutorSlot>) {
    let mut state = job.state().lock().await;

    if state.lifecycle != Lifecycle::Active {
        return;
    }
    if !state.config.concurrent_builds && !state.running().is_empty() {
        debug!(job = %job.name(), "Build already running; leaving request queued");
        return;
    }

    let Some(item) = ctx.inner.queue.take(id).await else {
        return;
    };

    let number = match job.runs().allocate_number().await {
        Ok(number) => number,
        Err(e) => {
            error!(job = %job.name(), error = %e, "Failed to allocate run number");
            item.cancel();
            return;
        }
    };

    let scm_triggered = item.causes.iter().any(|c| c.is_scm_change());
    let request = BuildRequest {
        job: job.name().clone(),
        number,
        causes: item.causes.clone(),
        queued_at: item.queued_at,
        definition: state.config.definition.clone(),
        listener: job.clone(),
    };

    match slot.try_launch(request, ctx.services()).await {
        Some(handle) => {
            state.running.push(RunningBuild {
                handle: handle.clone(),
                scm_triggered,
            });
            item.start(handle.clone());

            let ctx = ctx.clone();
            tokio::spawn(async move {
                handle.wait().await;
                ctx.inner.queue.notify();
            });
        }
        None => {
            warn!(job = %job.name(), number, "Executor became busy; requeueing");
            ctx.inner.queue.restore(item).await;
        }
    }
}
