//! Components configured through `config.override` now take `config.merge`,
//! which is merged into the chart's configuration instead of replacing it.

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::{
    Error,
    conflicts::{Conflicts, nested, rest_conflicts},
    emit, parse,
};

/// A component with a `config` section of shape `C`.
#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
pub(crate) struct Component<C> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) config: Option<C>,
    #[serde(flatten)]
    pub(crate) rest: Mapping,
}

impl<C> Conflicts for Component<C>
where
    C: Conflicts,
{
    fn collect_conflicts(&self, prefix: &str, found: &mut Vec<String>) {
        rest_conflicts(&self.rest, &["config"], prefix, found);
        self.config.collect_conflicts(&nested(prefix, "config"), found);
    }
}

#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
struct OverrideConfig {
    #[serde(rename = "override", default, skip_serializing_if = "Option::is_none")]
    overrides: Option<Value>,
    #[serde(flatten)]
    rest: Mapping,
}

#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
pub(crate) struct MergeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) merge: Option<Value>,
    #[serde(flatten)]
    pub(crate) rest: Mapping,
}

impl Conflicts for MergeConfig {
    fn collect_conflicts(&self, prefix: &str, found: &mut Vec<String>) {
        rest_conflicts(&self.rest, &["merge"], prefix, found);
    }
}

/// Rename `config.override` to `config.merge` under the top-level `key`.
fn migrate_component(input: &str, key: &str) -> Result<String, Error> {
    let mut values: Mapping = parse(input)?;
    let Some(component @ Value::Mapping(_)) = values.get(key) else {
        return Ok(input.to_string());
    };
    let component: Component<OverrideConfig> = serde_yaml::from_value(component.clone())?;
    let Some(OverrideConfig {
        overrides: Some(merge),
        rest: config_rest,
    }) = component.config
    else {
        return Ok(input.to_string());
    };

    let migrated = Component {
        config: Some(MergeConfig {
            merge: Some(merge),
            rest: config_rest,
        }),
        rest: component.rest,
    };
    migrated.check_conflicts_at(&nested("", key))?;
    values.insert(Value::from(key), serde_yaml::to_value(&migrated)?);
    emit(&values)
}

/// Rename `otelevents.config.override` to `otelevents.config.merge`.
///
/// # Errors
///
/// Function will return an error if the input is not valid YAML or if
/// `otelevents.config` already holds a `merge` key.
pub fn migrate_otelevents(input: &str) -> Result<String, Error> {
    migrate_component(input, "otelevents")
}

/// Rename `otellogs.config.override` to `otellogs.config.merge`.
///
/// # Errors
///
/// Function will return an error if the input is not valid YAML or if
/// `otellogs.config` already holds a `merge` key.
pub fn migrate_otellogs(input: &str) -> Result<String, Error> {
    migrate_component(input, "otellogs")
}
