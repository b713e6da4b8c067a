//! Build script interpreter.
//!
//! Runs one build to completion: resolves the script from the job's
//! definition, executes its steps, records every checkout on the run, and
//! reports the final record through the `RunListener`.
//!
//! Cancellation is cooperative. It is observed between steps and inside
//! `sleep`. Once a `try` block has caught the interruption, the rest of
//! the script runs to completion and cannot be interrupted again.

use crate::StepError;
use async_recursion::async_recursion;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conveyor_config::{VariableContext, VariableContextBuilder, parse_script};
use conveyor_core::definition::{CheckoutTarget, Definition, Script, Step};
use conveyor_core::{
    Cause, Checkout, ExecutionSink, JobName, LogLine, Result, Run, RunStatus, ScmCheckout, ScmConfig,
};
use conveyor_scm::ScmRegistry;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Receives the run record as it moves through its lifecycle.
#[async_trait]
pub trait RunListener: Send + Sync {
    /// The run has been given a slot; no step has run yet.
    async fn on_started(&self, run: &Run) -> Result<()>;

    /// The run has stopped. Returns the record as persisted.
    async fn on_completed(&self, run: Run) -> Result<Arc<Run>>;
}

/// Services every build uses.
#[derive(Clone)]
pub struct BuildServices {
    pub sink: Arc<dyn ExecutionSink>,
    pub scms: ScmRegistry,
}

/// Everything needed to start one run.
pub struct BuildRequest {
    pub job: JobName,
    pub number: u64,
    pub causes: Vec<Cause>,
    pub queued_at: DateTime<Utc>,
    pub definition: Definition,
    pub listener: Arc<dyn RunListener>,
}

/// Execute a build and return its final record.
pub(crate) async fn execute(
    request: BuildRequest,
    services: BuildServices,
    cancel: CancellationToken,
) -> Arc<Run> {
    let BuildRequest {
        job,
        number,
        causes,
        queued_at,
        definition,
        listener,
    } = request;

    let mut run = Run::started(job.clone(), number, causes, queued_at);
    let recorded = listener.on_started(&run).await;

    let cause = run
        .causes
        .first()
        .map(|c| c.to_string())
        .unwrap_or_default();
    let mut vars = VariableContextBuilder::new()
        .with_job(job.as_str())
        .with_run(number, cause)
        .build();
    vars.populate_env();

    let mut build = Build {
        job: job.clone(),
        number,
        sink: services.sink,
        scms: services.scms,
        cancel: cancel.clone(),
        interrupted: false,
        checkouts: Vec::new(),
        vars,
    };

    for cause in &run.causes {
        build.log(LogLine::system(cause.to_string())).await;
    }

    let outcome = match recorded {
        Ok(()) => {
            info!(job = %job, number, "Run started");
            build.run(&definition).await
        }
        Err(e) => {
            error!(job = %job, number, error = %e, "Failed to record run start");
            Err(StepError::Failed(format!("cannot record run start: {}", e)))
        }
    };

    let (status, message) = match outcome {
        _ if cancel.is_cancelled() => (RunStatus::Aborted, None),
        Ok(()) => (RunStatus::Success, None),
        Err(StepError::Interrupted) => (RunStatus::Aborted, None),
        Err(e) => {
            build.log(LogLine::system(format!("ERROR: {}", e))).await;
            (RunStatus::Failure, Some(e.to_string()))
        }
    };
    build
        .log(LogLine::system(format!(
            "Finished: {}",
            format!("{:?}", status).to_uppercase()
        )))
        .await;

    run.checkouts = std::mem::take(&mut build.checkouts);
    run.status = status;
    run.message = message;
    run.finished_at = Some(Utc::now());

    info!(job = %job, number, status = ?status, "Run completed");

    match listener.on_completed(run.clone()).await {
        Ok(stored) => stored,
        Err(e) => {
            error!(job = %job, number, error = %e, "Failed to record completed run");
            build
                .log(LogLine::system(format!("ERROR: run record not saved: {}", e)))
                .await;
            run.status = RunStatus::Failure;
            run.message = Some(format!("run record not saved: {}", e));
            Arc::new(run)
        }
    }
}

/// Interpreter state for one run.
struct Build {
    job: JobName,
    number: u64,
    sink: Arc<dyn ExecutionSink>,
    scms: ScmRegistry,
    cancel: CancellationToken,
    /// Set once the interruption has been delivered to the script.
    interrupted: bool,
    checkouts: Vec<ScmCheckout>,
    vars: VariableContext,
}

impl Build {
    async fn run(&mut self, definition: &Definition) -> std::result::Result<(), StepError> {
        let script = self.resolve_script(definition).await?;
        debug!(job = %self.job, number = self.number, steps = script.steps.len(), "Running script");
        self.run_steps(&script.steps, definition).await
    }

    async fn resolve_script(&mut self, definition: &Definition) -> std::result::Result<Script, StepError> {
        match definition {
            Definition::Inline { script } => Ok(parse_script(script)?),
            Definition::Scm { scm, script_path } => {
                let checkout = self.checkout(scm).await?;
                let text = self
                    .scms
                    .read_file(&checkout, script_path)
                    .await
                    .map_err(|e| StepError::Failed(format!("cannot read {}: {}", script_path, e)))?;
                Ok(parse_script(&text)?)
            }
        }
    }

    #[async_recursion]
    async fn run_steps(
        &mut self,
        steps: &[Step],
        definition: &Definition,
    ) -> std::result::Result<(), StepError> {
        for step in steps {
            self.check_interrupt()?;
            self.run_step(step, definition).await?;
        }
        Ok(())
    }

    async fn run_step(
        &mut self,
        step: &Step,
        definition: &Definition,
    ) -> std::result::Result<(), StepError> {
        match step {
            Step::Echo { message } => {
                let line = self.vars.interpolate(message);
                self.log(LogLine::stdout(line)).await;
                Ok(())
            }
            Step::Sleep { duration } => {
                if self.interrupted {
                    tokio::time::sleep(*duration).await;
                    return Ok(());
                }
                let cancelled = tokio::select! {
                    _ = tokio::time::sleep(*duration) => false,
                    _ = self.cancel.cancelled() => true,
                };
                if cancelled {
                    self.interrupted = true;
                    return Err(StepError::Interrupted);
                }
                Ok(())
            }
            Step::Checkout { target } => {
                let scm = match target {
                    CheckoutTarget::DefinitionScm => definition.own_scm().cloned().ok_or_else(|| {
                        StepError::Failed("checkout \"scm\" needs an SCM definition".to_string())
                    })?,
                    CheckoutTarget::Explicit(scm) => scm.clone(),
                };
                self.checkout(&scm).await.map(|_| ())
            }
            Step::Error { message } => Err(StepError::Failed(self.vars.interpolate(message))),
            Step::Try { body, catch } => match self.run_steps(body, definition).await {
                Ok(()) => Ok(()),
                Err(e) => {
                    self.log(LogLine::system(format!("Caught: {}", e))).await;
                    self.run_steps(catch, definition).await
                }
            },
        }
    }

    fn check_interrupt(&mut self) -> std::result::Result<(), StepError> {
        if self.cancel.is_cancelled() && !self.interrupted {
            self.interrupted = true;
            return Err(StepError::Interrupted);
        }
        Ok(())
    }

    async fn checkout(&mut self, scm: &ScmConfig) -> std::result::Result<Checkout, StepError> {
        let checkout = self.scms.checkout(scm).await?;
        self.log(LogLine::system(format!(
            "Checked out {} at {}",
            checkout.scm,
            checkout.revision.short()
        )))
        .await;
        self.vars.set_scm(checkout.scm.key(), checkout.revision.as_str());
        self.checkouts.push(checkout.clone().into());
        Ok(checkout)
    }

    async fn log(&self, line: LogLine) {
        if let Err(e) = self.sink.append(&self.job, self.number, line).await {
            warn!(job = %self.job, number = self.number, error = %e, "Failed to write build log");
        }
    }
}
