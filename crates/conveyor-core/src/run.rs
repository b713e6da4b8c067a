//! Run records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::id::JobName;
use crate::scm::{Checkout, Revision, ScmConfig};

/// Why a run was scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Cause {
    /// Started by a user.
    Manual { user: Option<String> },
    /// Started because polling found a new revision.
    ScmChange { revision: Option<Revision> },
    /// Started from the command line.
    Cli,
}

impl Cause {
    pub fn is_scm_change(&self) -> bool {
        matches!(self, Cause::ScmChange { .. })
    }
}

impl std::fmt::Display for Cause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cause::Manual { user: Some(user) } => write!(f, "Started by user {user}"),
            Cause::Manual { user: None } => f.write_str("Started by user"),
            Cause::ScmChange { .. } => f.write_str("Started by an SCM change"),
            Cause::Cli => f.write_str("Started from command line"),
        }
    }
}

/// Status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Success,
    Failure,
    Aborted,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Success | RunStatus::Failure | RunStatus::Aborted
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Success)
    }
}

/// An SCM checked out during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScmCheckout {
    pub scm: ScmConfig,
    pub revision: Revision,
}

impl From<Checkout> for ScmCheckout {
    fn from(checkout: Checkout) -> Self {
        Self {
            scm: checkout.scm,
            revision: checkout.revision,
        }
    }
}

/// One execution of a job. Immutable once its status is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub job: JobName,
    /// Run number, 1-based and never reused within a job.
    pub number: u64,
    pub status: RunStatus,
    pub causes: Vec<Cause>,
    /// SCMs checked out during the run, in checkout order.
    pub checkouts: Vec<ScmCheckout>,
    /// Key under which the `ExecutionSink` stores this run's log.
    pub log_ref: String,
    /// Failure message, if the run failed.
    pub message: Option<String>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Run {
    /// A run that has just been assigned to an execution slot.
    pub fn started(job: JobName, number: u64, causes: Vec<Cause>, queued_at: DateTime<Utc>) -> Self {
        let log_ref = format!("{job}/{number}/log");
        Self {
            job,
            number,
            status: RunStatus::Running,
            causes,
            checkouts: Vec::new(),
            log_ref,
            message: None,
            queued_at,
            started_at: Some(Utc::now()),
            finished_at: None,
        }
    }

    /// SCM snapshot of this run: the distinct SCMs it checked out.
    pub fn scms(&self) -> Vec<ScmConfig> {
        let mut scms: Vec<ScmConfig> = Vec::new();
        for checkout in &self.checkouts {
            if !scms.contains(&checkout.scm) {
                scms.push(checkout.scm.clone());
            }
        }
        scms
    }

    /// Last revision recorded for an SCM during this run.
    pub fn revision_of(&self, scm: &ScmConfig) -> Option<&Revision> {
        self.checkouts
            .iter()
            .rev()
            .find(|c| c.scm == *scm)
            .map(|c| &c.revision)
    }

    pub fn is_complete(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Persisted pointers that let a job resolve notable runs without a scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permalinks {
    pub last_completed: Option<u64>,
    pub last_successful: Option<u64>,
    /// Runs started but not yet completed.
    #[serde(default)]
    pub in_progress: BTreeSet<u64>,
}

impl Permalinks {
    /// Track a started or completed run. Older runs never move the
    /// completed pointers back.
    pub fn record(&mut self, number: u64, status: RunStatus) {
        if !status.is_terminal() {
            self.in_progress.insert(number);
            return;
        }
        self.in_progress.remove(&number);
        if self.last_completed.is_none_or(|n| n < number) {
            self.last_completed = Some(number);
        }
        if status.is_success() && self.last_successful.is_none_or(|n| n < number) {
            self.last_successful = Some(number);
        }
    }
}
