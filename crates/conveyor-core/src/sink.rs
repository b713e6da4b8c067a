//! Build log types and the `ExecutionSink` trait.
//!
//! Build output goes to an execution sink keyed by job and run number,
//! separately from the process's own tracing output.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobName, Result};

/// A line of build log output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub stream: LogStream,
    pub content: String,
}

impl LogLine {
    pub fn stdout(content: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            stream: LogStream::Stdout,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            stream: LogStream::System,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogStream {
    Stdout,
    Stderr,
    System,
}

/// Where build logs are written.
#[async_trait]
pub trait ExecutionSink: Send + Sync {
    /// Append a line to a run's log.
    async fn append(&self, job: &JobName, number: u64, line: LogLine) -> Result<()>;

    /// Read a run's full log.
    async fn read(&self, job: &JobName, number: u64) -> Result<Vec<LogLine>>;

    /// Drop every log belonging to a job.
    async fn purge(&self, job: &JobName) -> Result<()>;
}
