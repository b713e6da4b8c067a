//! SCM polling.
//!
//! A poll compares the revision each of the job's SCMs points at now with
//! the revision the last completed run checked out, and schedules a build
//! when they differ. A job that has never completed a run has no baseline
//! and is always considered changed.

use crate::OrchestrationContext;
use crate::job::Job;
use crate::queue::ScheduleHandle;
use conveyor_core::{Cause, JobName, Result, Revision, TriggerConfig};
use std::sync::Arc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What a poll did.
#[derive(Debug, Clone)]
pub enum PollOutcome {
    /// Every SCM is at the revision last built.
    NoChanges,
    /// A change was found and a build requested.
    Scheduled(ScheduleHandle),
    /// A poll-triggered build is already queued or running.
    AlreadyPending,
    /// The job has no SCM polling trigger.
    NotPolled,
    Disabled,
}

impl PollOutcome {
    pub fn is_scheduled(&self) -> bool {
        matches!(self, PollOutcome::Scheduled(_))
    }
}

impl OrchestrationContext {
    /// Poll a job's SCMs now. Polls of the same job are serialized.
    pub async fn poll(&self, name: &JobName) -> Result<PollOutcome> {
        let job = self.require_job(name).await?;
        *job.last_polled.lock().await = Some(Instant::now());
        let _guard = job.poll_lock.lock().await;

        let config = job.config().await;
        if config.scm_poll_trigger().is_none() {
            return Ok(PollOutcome::NotPolled);
        }
        if !config.enabled {
            return Ok(PollOutcome::Disabled);
        }
        if self.poll_build_pending(&job).await {
            debug!(job = %name, "Poll-triggered build already pending");
            return Ok(PollOutcome::AlreadyPending);
        }

        let Some(revision) = self.find_change(&job).await? else {
            debug!(job = %name, "No SCM changes");
            return Ok(PollOutcome::NoChanges);
        };

        let cause = Cause::ScmChange {
            revision: Some(revision.clone()),
        };
        match self.schedule(name, cause).await? {
            Some(handle) => {
                info!(job = %name, revision = %revision.short(), "SCM change found; build scheduled");
                Ok(PollOutcome::Scheduled(handle))
            }
            None => Ok(PollOutcome::Disabled),
        }
    }

    async fn poll_build_pending(&self, job: &Job) -> bool {
        let queued = self
            .inner
            .queue
            .pending_causes(job.name())
            .await
            .iter()
            .any(|c| c.is_scm_change());
        if queued {
            return true;
        }

        job.state()
            .lock()
            .await
            .running()
            .iter()
            .any(|b| b.scm_triggered)
    }

    /// The first SCM revision that differs from the last completed run.
    async fn find_change(&self, job: &Job) -> Result<Option<Revision>> {
        let scms = job.current_scms().await?;
        let baseline = job.runs().last_completed_run().await?;

        let mut first_seen = None;
        for scm in &scms {
            let current = self.inner.scms.current_revision(scm).await?;
            let previous = baseline.as_ref().and_then(|run| run.revision_of(scm));
            if previous != Some(&current) {
                debug!(job = %job.name(), scm = %scm, revision = %current.short(), "SCM changed");
                return Ok(Some(current));
            }
            first_seen.get_or_insert(current);
        }

        match baseline {
            // Nothing built yet: build whatever is there.
            None => Ok(Some(first_seen.unwrap_or_else(|| Revision::new("none")))),
            Some(_) => Ok(None),
        }
    }
}

/// Poll every job whose trigger interval has elapsed, until cancelled.
pub(crate) async fn run_ticker(ctx: OrchestrationContext, cancel: CancellationToken) {
    let mut tick = tokio::time::interval(ctx.config().tick_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(interval_ms = ctx.config().tick_interval.as_millis() as u64, "Starting SCM polling ticker");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {}
        }

        for job in ctx.jobs().await {
            if claim_tick(&job).await {
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(e) = ctx.poll(job.name()).await {
                        warn!(job = %job.name(), error = %e, "SCM poll failed");
                    }
                });
            }
        }
    }

    info!("SCM polling ticker stopped");
}

/// Whether the job's polling interval has elapsed. Marks it polled if so.
async fn claim_tick(job: &Arc<Job>) -> bool {
    let interval = match job.config().await.scm_poll_trigger() {
        Some(TriggerConfig::ScmPoll {
            interval: Some(interval),
        }) => *interval,
        _ => return false,
    };

    let mut last_polled = job.last_polled.lock().await;
    let due = last_polled.is_none_or(|last| last.elapsed() >= interval);
    if due {
        *last_polled = Some(Instant::now());
    }
    due
}
