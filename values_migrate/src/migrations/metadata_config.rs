//! The metadata StatefulSets take their extra configuration under
//! `config.merge` instead of directly under `config`.

use serde_yaml::{Mapping, Value};

use super::config_merge::{Component, MergeConfig};
use crate::{Error, emit, parse};

/// Move `metadata.<section>.config` under `metadata.<section>.config.merge`.
fn migrate_section(input: &str, section: &str) -> Result<String, Error> {
    let mut values: Mapping = parse(input)?;
    let Some(Value::Mapping(metadata)) = values.get_mut("metadata") else {
        return Ok(input.to_string());
    };
    let Some(component @ Value::Mapping(_)) = metadata.get(section) else {
        return Ok(input.to_string());
    };
    let component: Component<Value> = serde_yaml::from_value(component.clone())?;
    let config = match component.config {
        Some(Value::Mapping(config)) if !already_migrated(&config) => config,
        _ => return Ok(input.to_string()),
    };

    let migrated = Component {
        config: Some(MergeConfig {
            merge: Some(Value::Mapping(config)),
            rest: Mapping::new(),
        }),
        rest: component.rest,
    };
    metadata.insert(Value::from(section), serde_yaml::to_value(&migrated)?);
    emit(&values)
}

/// A `config` holding nothing but `merge` or `override` is in its new shape.
fn already_migrated(config: &Mapping) -> bool {
    !config.is_empty()
        && config
            .keys()
            .all(|key| matches!(key.as_str(), Some("merge" | "override")))
}

/// Move `metadata.logs.config` under `metadata.logs.config.merge`.
///
/// # Errors
///
/// Function will return an error if the input is not valid YAML.
pub fn migrate_logs(input: &str) -> Result<String, Error> {
    migrate_section(input, "logs")
}

/// Move `metadata.metrics.config` under `metadata.metrics.config.merge`.
///
/// # Errors
///
/// Function will return an error if the input is not valid YAML.
pub fn migrate_metrics(input: &str) -> Result<String, Error> {
    migrate_section(input, "metrics")
}
