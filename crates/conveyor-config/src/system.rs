//! System configuration parsing.

use crate::kdl_util::{get_first_string_arg, get_millis_arg, get_u64_prop};
use crate::{ConfigError, ConfigResult};
use kdl::KdlDocument;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default delay between a schedule request and the build starting.
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_secs(5);

/// Default granularity of the periodic SCM polling ticker.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// System-wide configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Quiet period applied to jobs without their own.
    pub quiet_period: Duration,
    /// How often interval-based SCM polling triggers are checked.
    pub tick_interval: Duration,
    /// Root of the filesystem storage backend.
    pub data_dir: Option<PathBuf>,
    /// Compute nodes and their execution slot counts.
    pub nodes: Vec<NodeConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    pub executors: usize,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            quiet_period: DEFAULT_QUIET_PERIOD,
            tick_interval: DEFAULT_TICK_INTERVAL,
            data_dir: None,
            nodes: vec![NodeConfig {
                name: "built-in".to_string(),
                executors: 2,
            }],
        }
    }
}

/// Parse system configuration from KDL text.
///
/// ```kdl
/// quiet-period-ms 0
/// tick-interval-ms 500
/// data-dir "/var/lib/conveyor"
/// node "built-in" executors=2
/// node "agent-1" executors=4
/// ```
pub fn parse_system_config(kdl: &str) -> ConfigResult<SystemConfig> {
    let doc: KdlDocument = kdl.parse()?;

    let mut config = SystemConfig::default();
    let mut nodes = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "quiet-period-ms" => config.quiet_period = get_millis_arg(node)?,
            "tick-interval-ms" => {
                let interval = get_millis_arg(node)?;
                if interval.is_zero() {
                    return Err(ConfigError::InvalidValue {
                        field: "tick-interval-ms".to_string(),
                        message: "must be greater than zero".to_string(),
                    });
                }
                config.tick_interval = interval;
            }
            "data-dir" => {
                let dir = get_first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("data-dir path".to_string()))?;
                config.data_dir = Some(PathBuf::from(dir));
            }
            "node" => {
                let name = get_first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("node name".to_string()))?;
                if nodes.iter().any(|n: &NodeConfig| n.name == name) {
                    return Err(ConfigError::Duplicate(format!("node '{}'", name)));
                }
                let executors = get_u64_prop(node, "executors")?.unwrap_or(1) as usize;
                nodes.push(NodeConfig { name, executors });
            }
            _ => {} // Ignore unknown nodes
        }
    }

    if !nodes.is_empty() {
        config.nodes = nodes;
    }

    if config.nodes.iter().all(|n| n.executors == 0) {
        return Err(ConfigError::InvalidValue {
            field: "node".to_string(),
            message: "at least one node needs an executor".to_string(),
        });
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_system_config("").unwrap();
        assert_eq!(config, SystemConfig::default());
        assert_eq!(config.quiet_period, DEFAULT_QUIET_PERIOD);
        assert_eq!(config.nodes.len(), 1);
    }

    #[test]
    fn test_parse_full_config() {
        let kdl = r#"
            quiet-period-ms 0
            tick-interval-ms 250
            data-dir "/tmp/conveyor"
            node "built-in" executors=1
            node "agent-1" executors=4
        "#;

        let config = parse_system_config(kdl).unwrap();
        assert_eq!(config.quiet_period, Duration::ZERO);
        assert_eq!(config.tick_interval, Duration::from_millis(250));
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/conveyor")));
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.nodes[1].executors, 4);
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let kdl = r#"
            node "a" executors=1
            node "a" executors=2
        "#;
        assert!(matches!(
            parse_system_config(kdl).unwrap_err(),
            ConfigError::Duplicate(_)
        ));
    }

    #[test]
    fn test_no_executors_rejected() {
        let kdl = r#"node "a" executors=0"#;
        assert!(matches!(
            parse_system_config(kdl).unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }
}
