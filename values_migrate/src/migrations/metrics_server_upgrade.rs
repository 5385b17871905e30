//! metrics-server moved to a new major version of its chart.

use serde_yaml::Value;
use tracing::warn;

use super::MIGRATION_DOC;
use crate::{Error, lookup};

const UPSTREAM_DOC: &str = "https://github.com/bitnami/charts/tree/5b09f7a7c0d9232f5752840b6c4e5cdc56d7f796/bitnami/metrics-server#to-600";

/// Whether `value` holds any configuration at all.
pub(crate) fn configured(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Mapping(mapping)) => !mapping.is_empty(),
        Some(_) => true,
    }
}

pub(crate) fn warning(values: &Value) -> Option<String> {
    configured(lookup(values, &["metrics-server"])).then(|| {
        format!(
            "WARNING! Changes in metrics-server detected, which may require manual migration\nFor details please see the following documentations:\n  - {MIGRATION_DOC}\n  - {UPSTREAM_DOC}"
        )
    })
}

/// Warn when metrics-server is configured. The document is returned
/// unchanged.
///
/// # Errors
///
/// Function will return an error if the input is not valid YAML.
pub fn migrate(input: &str) -> Result<String, Error> {
    let values: Value = serde_yaml::from_str(input)?;
    if let Some(warning) = warning(&values) {
        warn!("{warning}");
    }
    Ok(input.to_string())
}

#[cfg(test)]
mod test {
    use serde_yaml::Value;

    use super::warning;

    #[test]
    fn warns_when_configured() {
        let values: Value = serde_yaml::from_str("metrics-server:\n  enabled: true\n").unwrap();
        let warning = warning(&values).unwrap();
        assert!(warning.starts_with("WARNING! Changes in metrics-server detected"));
        assert!(warning.ends_with("bitnami/metrics-server#to-600"));
    }

    #[test]
    fn silent_when_empty() {
        for input in ["metrics-server: {}\n", "sumologic:\n  accessId: id\n", "{}"] {
            let values: Value = serde_yaml::from_str(input).unwrap();
            assert!(warning(&values).is_none(), "{input}");
        }
    }
}
