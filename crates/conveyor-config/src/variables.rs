//! Variable interpolation for build script messages.
//!
//! Supports variables like:
//! - `${job.name}` - Job name
//! - `${run.number}` - Run number
//! - `${run.cause}` - Human-readable first cause of the run
//! - `${scm.key}` - Key of the most recently checked-out SCM
//! - `${scm.revision}` - Its checked-out revision
//! - `${scm.short_revision}` - First 7 characters of the revision
//! - `${env.VAR_NAME}` - Environment variable
//! - `${timestamp}` - Unix timestamp
//! - `${date}` - ISO date (YYYY-MM-DD)
//! - `${datetime}` - ISO datetime

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Variable context containing all available variables for interpolation.
#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    pub job: JobContext,
    pub run: RunContext,
    pub scm: ScmContext,
    /// Environment variables
    pub env: HashMap<String, String>,
    /// Custom variables defined by user
    pub custom: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct JobContext {
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub number: u64,
    pub cause: String,
}

/// Updated by the executor after every checkout.
#[derive(Debug, Clone, Default)]
pub struct ScmContext {
    pub key: String,
    pub revision: String,
    pub short_revision: String,
}

// Regex for matching ${...} variables
static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_]*)?)\}").unwrap()
});

impl VariableContext {
    /// Create a new empty variable context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate environment variables from the current process environment.
    pub fn populate_env(&mut self) {
        for (key, value) in std::env::vars() {
            self.env.insert(key, value);
        }
    }

    /// Record a checkout so later messages can refer to it.
    pub fn set_scm(&mut self, key: impl Into<String>, revision: impl Into<String>) {
        let revision = revision.into();
        self.scm.short_revision = revision.chars().take(7).collect();
        self.scm.revision = revision;
        self.scm.key = key.into();
    }

    /// Add a custom variable.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.custom.insert(name.to_string(), value.into());
    }

    /// Resolve a variable name to its value.
    pub fn resolve(&self, var_name: &str) -> Option<String> {
        let parts: Vec<&str> = var_name.split('.').collect();

        match parts.as_slice() {
            ["job", "name"] => Some(self.job.name.clone()),

            ["run", "number"] => Some(self.run.number.to_string()),
            ["run", "cause"] => Some(self.run.cause.clone()),

            ["scm", "key"] => Some(self.scm.key.clone()),
            ["scm", "revision"] => Some(self.scm.revision.clone()),
            ["scm", "short_revision"] => Some(self.scm.short_revision.clone()),

            ["env", name] => self.env.get(*name).cloned(),

            ["timestamp"] => Some(chrono::Utc::now().timestamp().to_string()),
            ["date"] => Some(chrono::Utc::now().format("%Y-%m-%d").to_string()),
            ["datetime"] => Some(chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()),

            // Single-part names check custom variables
            [name] => self.custom.get(*name).cloned(),

            _ => None,
        }
    }

    /// Interpolate all variables in a string.
    /// Unknown variables are left as written.
    pub fn interpolate(&self, input: &str) -> String {
        VAR_REGEX
            .replace_all(input, |caps: &regex::Captures| {
                let var_name = &caps[1];
                self.resolve(var_name)
                    .unwrap_or_else(|| format!("${{{}}}", var_name))
            })
            .to_string()
    }
}

/// Builder for creating VariableContext.
pub struct VariableContextBuilder {
    ctx: VariableContext,
}

impl VariableContextBuilder {
    pub fn new() -> Self {
        Self {
            ctx: VariableContext::new(),
        }
    }

    pub fn with_job(mut self, name: impl Into<String>) -> Self {
        self.ctx.job.name = name.into();
        self
    }

    pub fn with_run(mut self, number: u64, cause: impl Into<String>) -> Self {
        self.ctx.run.number = number;
        self.ctx.run.cause = cause.into();
        self
    }

    pub fn with_scm(mut self, key: impl Into<String>, revision: impl Into<String>) -> Self {
        self.ctx.set_scm(key, revision);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.env.insert(key.into(), value.into());
        self
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.custom.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> VariableContext {
        self.ctx
    }
}

impl Default for VariableContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}
