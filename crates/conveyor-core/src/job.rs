//! Job configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::definition::Definition;
use crate::id::JobName;

/// A named, configurable, repeatable unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: JobName,
    /// Disabled jobs reject new schedule requests.
    pub enabled: bool,
    /// Allow more than one run of this job to execute at once.
    #[serde(default)]
    pub concurrent_builds: bool,
    /// Overrides the system quiet period for this job.
    #[serde(default, with = "opt_millis")]
    pub quiet_period: Option<Duration>,
    #[serde(default)]
    pub triggers: Vec<TriggerConfig>,
    #[serde(default)]
    pub definition: Definition,
}

impl JobConfig {
    pub fn new(name: JobName) -> Self {
        Self {
            name,
            enabled: true,
            concurrent_builds: false,
            quiet_period: None,
            triggers: Vec::new(),
            definition: Definition::default(),
        }
    }

    pub fn with_definition(mut self, definition: Definition) -> Self {
        self.definition = definition;
        self
    }

    pub fn with_trigger(mut self, trigger: TriggerConfig) -> Self {
        self.triggers.push(trigger);
        self
    }

    /// The SCM polling trigger, if configured.
    pub fn scm_poll_trigger(&self) -> Option<&TriggerConfig> {
        self.triggers
            .iter()
            .find(|t| matches!(t, TriggerConfig::ScmPoll { .. }))
    }
}

/// What can start a job besides a manual request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerConfig {
    /// Poll the job's SCMs. Without an interval the job is only polled on
    /// demand (for example by a commit hook).
    ScmPoll {
        #[serde(default, with = "opt_millis")]
        interval: Option<Duration>,
    },
}

/// Structured enabled/disabled status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub disabled: bool,
    pub buildable: bool,
}

impl JobStatusView {
    pub fn from_enabled(enabled: bool) -> Self {
        Self {
            disabled: !enabled,
            buildable: enabled,
        }
    }
}

mod opt_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_view_json_shape() {
        let json = serde_json::to_value(JobStatusView::from_enabled(false)).unwrap();
        assert_eq!(json, serde_json::json!({"disabled": true, "buildable": false}));
    }

    #[test]
    fn test_job_config_roundtrip_keeps_durations() {
        let config = JobConfig::new(JobName::new("p").unwrap()).with_trigger(TriggerConfig::ScmPoll {
            interval: Some(Duration::from_millis(1500)),
        });
        let json = serde_json::to_string(&config).unwrap();
        let back: JobConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
        assert!(back.scm_poll_trigger().is_some());
    }
}
