// Helper functions for extracting values from KDL nodes

use crate::{ConfigError, ConfigResult};
use kdl::{KdlNode, KdlValue};
use std::time::Duration;

pub(crate) fn get_first_arg(node: &KdlNode) -> Option<&KdlValue> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .map(|e| e.value())
}

pub(crate) fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    get_first_arg(node)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

pub(crate) fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

pub(crate) fn get_bool_prop(node: &KdlNode, name: &str) -> Option<bool> {
    node.get(name).and_then(|v| v.as_bool())
}

/// A flag node like `enabled #false`; a bare `enabled` means true.
pub(crate) fn get_flag(node: &KdlNode) -> ConfigResult<bool> {
    match get_first_arg(node) {
        None => Ok(true),
        Some(v) => v.as_bool().ok_or_else(|| ConfigError::InvalidValue {
            field: node.name().value().to_string(),
            message: format!("expected a boolean, got {v}"),
        }),
    }
}

fn as_u64(field: &str, value: &KdlValue) -> ConfigResult<u64> {
    value
        .as_integer()
        .and_then(|i| u64::try_from(i).ok())
        .ok_or_else(|| ConfigError::InvalidValue {
            field: field.to_string(),
            message: format!("expected a non-negative integer, got {value}"),
        })
}

pub(crate) fn get_u64_arg(node: &KdlNode) -> ConfigResult<u64> {
    let field = node.name().value();
    let value = get_first_arg(node).ok_or_else(|| ConfigError::MissingField(field.to_string()))?;
    as_u64(field, value)
}

pub(crate) fn get_u64_prop(node: &KdlNode, name: &str) -> ConfigResult<Option<u64>> {
    node.get(name).map(|v| as_u64(name, v)).transpose()
}

/// `node 250` read as milliseconds.
pub(crate) fn get_millis_arg(node: &KdlNode) -> ConfigResult<Duration> {
    get_u64_arg(node).map(Duration::from_millis)
}
