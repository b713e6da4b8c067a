//! Build script parsing.
//!
//! A build script is a KDL document whose nodes are steps:
//!
//! ```kdl
//! checkout "scm"
//! echo "building ${job.name} #${run.number}"
//! try {
//!     sleep 999
//! }
//! catch {
//!     echo "aborting soon"
//!     sleep ms=250
//! }
//! ```

use crate::kdl_util::{get_first_arg, get_first_string_arg, get_string_prop, get_u64_prop};
use crate::{ConfigError, ConfigResult};
use conveyor_core::definition::{CheckoutTarget, Script, Step};
use conveyor_core::scm::ScmConfig;
use kdl::{KdlDocument, KdlNode};
use std::time::Duration;

/// Parse a build script from KDL text. Empty text is an empty script.
pub fn parse_script(kdl: &str) -> ConfigResult<Script> {
    let doc: KdlDocument = kdl.parse()?;
    Ok(Script {
        steps: parse_block(doc.nodes())?,
    })
}

fn parse_block(nodes: &[KdlNode]) -> ConfigResult<Vec<Step>> {
    let mut steps = Vec::new();
    let mut iter = nodes.iter().peekable();

    while let Some(node) = iter.next() {
        let step = match node.name().value() {
            "echo" => Step::Echo {
                message: get_first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("echo message".to_string()))?,
            },
            "sleep" => Step::Sleep {
                duration: parse_sleep(node)?,
            },
            "checkout" => Step::Checkout {
                target: parse_checkout(node)?,
            },
            "error" => Step::Error {
                message: get_first_string_arg(node).unwrap_or_else(|| "error".to_string()),
            },
            "try" => {
                let body = children(node)?;
                let catch = match iter.peek() {
                    Some(next) if next.name().value() == "catch" => {
                        let next = iter.next().map(children).transpose()?;
                        next.unwrap_or_default()
                    }
                    _ => Vec::new(),
                };
                Step::Try { body, catch }
            }
            "catch" => {
                return Err(ConfigError::InvalidValue {
                    field: "catch".to_string(),
                    message: "catch must directly follow a try block".to_string(),
                });
            }
            other => return Err(ConfigError::UnknownStep(other.to_string())),
        };
        steps.push(step);
    }

    Ok(steps)
}

fn children(node: &KdlNode) -> ConfigResult<Vec<Step>> {
    match node.children() {
        Some(doc) => parse_block(doc.nodes()),
        None => Ok(Vec::new()),
    }
}

/// `sleep 3` is seconds, `sleep ms=250` is milliseconds.
fn parse_sleep(node: &KdlNode) -> ConfigResult<Duration> {
    if let Some(ms) = get_u64_prop(node, "ms")? {
        return Ok(Duration::from_millis(ms));
    }

    let value = get_first_arg(node)
        .ok_or_else(|| ConfigError::MissingField("sleep duration".to_string()))?;

    if let Some(secs) = value.as_integer() {
        let secs = u64::try_from(secs).map_err(|_| ConfigError::InvalidValue {
            field: "sleep".to_string(),
            message: format!("negative duration: {secs}"),
        })?;
        return Ok(Duration::from_secs(secs));
    }

    match value.as_float() {
        Some(secs) if secs >= 0.0 && secs.is_finite() => Ok(Duration::from_secs_f64(secs)),
        _ => Err(ConfigError::InvalidValue {
            field: "sleep".to_string(),
            message: format!("expected seconds, got {value}"),
        }),
    }
}

fn parse_checkout(node: &KdlNode) -> ConfigResult<CheckoutTarget> {
    let kind = get_first_string_arg(node).unwrap_or_else(|| "scm".to_string());
    match kind.as_str() {
        "scm" => Ok(CheckoutTarget::DefinitionScm),
        _ => parse_scm(&kind, node).map(CheckoutTarget::Explicit),
    }
}

/// Parse an SCM from a kind plus the properties on `node`.
pub(crate) fn parse_scm(kind: &str, node: &KdlNode) -> ConfigResult<ScmConfig> {
    match kind {
        "null" => Ok(ScmConfig::Null),
        "git" => {
            let url = get_string_prop(node, "url")
                .ok_or_else(|| ConfigError::MissingField("git url".to_string()))?;
            Ok(ScmConfig::Git {
                url,
                branch: get_string_prop(node, "branch"),
            })
        }
        "memory" => {
            let repo = get_string_prop(node, "repo")
                .ok_or_else(|| ConfigError::MissingField("memory repo".to_string()))?;
            Ok(ScmConfig::Memory { repo })
        }
        _ => Err(ConfigError::InvalidValue {
            field: "scm kind".to_string(),
            message: format!("unknown scm kind: {}", kind),
        }),
    }
}
