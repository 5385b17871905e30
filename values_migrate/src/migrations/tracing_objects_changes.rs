//! The tracing components were renamed and restructured in v3.

use serde_yaml::Value;
use tracing::warn;

use super::MIGRATION_DOC;
use crate::{Error, lookup};

/// Each switch that, when on, means the tracing setup needs a manual look,
/// along with the component it enables.
const SWITCHES: [(&[&str], &str); 3] = [
    (&["sumologic", "traces", "enabled"], "otelcol"),
    (&["otelagent", "enabled"], "otelagent"),
    (&["otelgateway", "enabled"], "otelgateway"),
];

pub(crate) fn warnings(values: &Value) -> Vec<String> {
    SWITCHES
        .iter()
        .filter(|(path, _)| lookup(values, path).and_then(Value::as_bool) == Some(true))
        .map(|(_, component)| {
            format!(
                "WARNING! Found enabled {component}, for details please see documentation: {MIGRATION_DOC}#tracinginstrumentation-changes"
            )
        })
        .collect()
}

/// Warn about enabled tracing components. The document is returned
/// unchanged.
///
/// # Errors
///
/// Function will return an error if the input is not valid YAML.
pub fn migrate(input: &str) -> Result<String, Error> {
    let values: Value = serde_yaml::from_str(input)?;
    for warning in warnings(&values) {
        warn!("{warning}");
    }
    Ok(input.to_string())
}

#[cfg(test)]
mod test {
    use serde_yaml::Value;

    use super::warnings;

    #[test]
    fn one_warning_per_enabled_component() {
        let input = r"
sumologic:
  traces:
    enabled: true
otelagent:
  enabled: false
otelgateway:
  enabled: true
";
        let values: Value = serde_yaml::from_str(input).unwrap();
        let warnings = warnings(&values);
        assert_eq!(warnings.len(), 2);
        assert_eq!(
            warnings[0],
            "WARNING! Found enabled otelcol, for details please see documentation: https://github.com/SumoLogic/sumologic-kubernetes-collection/blob/main/docs/v3-migration-doc.md#tracinginstrumentation-changes"
        );
        assert!(warnings[1].starts_with("WARNING! Found enabled otelgateway,"));
    }

    #[test]
    fn nothing_enabled() {
        let values: Value = serde_yaml::from_str("otelagent:\n  image: x\n").unwrap();
        assert!(warnings(&values).is_empty());
    }
}
