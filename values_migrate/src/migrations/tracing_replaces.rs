//! v2 let otelcol configuration carry placeholder strings that the chart
//! swapped for computed values. v3 dropped the placeholders.

use serde_yaml::Value;
use tracing::warn;

use super::MIGRATION_DOC;
use crate::{Error, lookup};

const PLACEHOLDERS: [&str; 10] = [
    "processors.source.collector.replace",
    "processors.source.name.replace",
    "processors.source.category.replace",
    "processors.source.category_prefix.replace",
    "processors.source.category_replace_dash.replace",
    "processors.source.exclude_namespace_regex.replace",
    "processors.source.exclude_pod_regex.replace",
    "processors.source.exclude_container_regex.replace",
    "processors.source.exclude_host_regex.replace",
    "processors.resource.cluster.replace",
];

/// Visit every string in `value`, keys included.
fn strings<'a>(value: &'a Value, found: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => found.push(s),
        Value::Sequence(sequence) => {
            for item in sequence {
                strings(item, found);
            }
        }
        Value::Mapping(mapping) => {
            for (key, item) in mapping {
                strings(key, found);
                strings(item, found);
            }
        }
        Value::Tagged(tagged) => strings(&tagged.value, found),
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

/// Placeholders in use anywhere under `otelcol`, in declaration order.
pub(crate) fn placeholders(values: &Value) -> Vec<&'static str> {
    let Some(otelcol) = lookup(values, &["otelcol"]) else {
        return Vec::new();
    };
    let mut found = Vec::new();
    strings(otelcol, &mut found);
    PLACEHOLDERS
        .into_iter()
        .filter(|placeholder| found.iter().any(|s| s.contains(placeholder)))
        .collect()
}

/// Warn about placeholder values in otelcol configuration. The document is
/// returned unchanged.
///
/// # Errors
///
/// Function will return an error if the input is not valid YAML.
pub fn migrate(input: &str) -> Result<String, Error> {
    let values: Value = serde_yaml::from_str(input)?;
    let found = placeholders(&values);
    if !found.is_empty() {
        let list: Vec<String> = found.iter().map(|p| format!(" - {p}")).collect();
        warn!(
            "WARNING! Found following special values in otelcol configuration which must be manually migrated:\n{}\nfor details please see documentation: {MIGRATION_DOC}#replace-special-configuration-values-marked-by-replace-suffix",
            list.join("\n")
        );
    }
    Ok(input.to_string())
}
