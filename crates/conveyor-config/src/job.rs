//! Job definition parsing.
//!
//! ```kdl
//! job "p" {
//!     enabled #true
//!     concurrent #false
//!     quiet-period-ms 0
//!     trigger "scm-poll" interval-ms=60000
//!     definition "scm" path="build.kdl" {
//!         memory repo="sample"
//!     }
//! }
//! ```
//!
//! An inline definition carries its script as children:
//! `definition "inline" { echo "hi" }`.

use crate::kdl_util::{get_first_string_arg, get_flag, get_millis_arg, get_string_prop, get_u64_prop};
use crate::script::{parse_scm, parse_script};
use crate::{ConfigError, ConfigResult};
use conveyor_core::definition::Definition;
use conveyor_core::id::JobName;
use conveyor_core::job::{JobConfig, TriggerConfig};
use kdl::{KdlDocument, KdlNode};
use std::time::Duration;

/// Parse a job definition from KDL text.
pub fn parse_job(kdl: &str) -> ConfigResult<JobConfig> {
    let doc: KdlDocument = kdl.parse()?;

    let mut jobs = doc.nodes().iter().filter(|n| n.name().value() == "job");
    let node = jobs
        .next()
        .ok_or_else(|| ConfigError::MissingField("job".to_string()))?;
    if jobs.next().is_some() {
        return Err(ConfigError::Duplicate("job".to_string()));
    }

    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("job name".to_string()))?;
    let mut config = JobConfig::new(JobName::new(name)?);

    let Some(children) = node.children() else {
        return Ok(config);
    };

    let mut seen_definition = false;
    for child in children.nodes() {
        match child.name().value() {
            "enabled" => config.enabled = get_flag(child)?,
            "concurrent" => config.concurrent_builds = get_flag(child)?,
            "quiet-period-ms" => config.quiet_period = Some(get_millis_arg(child)?),
            "trigger" => config.triggers.push(parse_trigger(child)?),
            "definition" => {
                if seen_definition {
                    return Err(ConfigError::Duplicate("definition".to_string()));
                }
                seen_definition = true;
                config.definition = parse_definition(child)?;
            }
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(config)
}

fn parse_trigger(node: &KdlNode) -> ConfigResult<TriggerConfig> {
    let trigger_type = get_first_string_arg(node).unwrap_or_default();

    match trigger_type.as_str() {
        "scm-poll" => Ok(TriggerConfig::ScmPoll {
            interval: get_u64_prop(node, "interval-ms")?.map(Duration::from_millis),
        }),
        _ => Err(ConfigError::InvalidValue {
            field: "trigger type".to_string(),
            message: format!("unknown trigger type: {}", trigger_type),
        }),
    }
}

fn parse_definition(node: &KdlNode) -> ConfigResult<Definition> {
    let kind = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("definition type".to_string()))?;

    match kind.as_str() {
        "inline" => {
            let script = node
                .children()
                .map(|doc| doc.to_string())
                .unwrap_or_default();
            // Reject broken scripts at load time rather than at build time.
            parse_script(&script)?;
            Ok(Definition::Inline { script })
        }
        "scm" => {
            let script_path =
                get_string_prop(node, "path").unwrap_or_else(|| "build.kdl".to_string());
            let scm_node = node
                .children()
                .and_then(|doc| doc.nodes().first())
                .ok_or_else(|| ConfigError::MissingField("definition scm".to_string()))?;
            let scm = parse_scm(scm_node.name().value(), scm_node)?;
            Ok(Definition::Scm { scm, script_path })
        }
        _ => Err(ConfigError::InvalidValue {
            field: "definition type".to_string(),
            message: format!("unknown definition type: {}", kind),
        }),
    }
}
