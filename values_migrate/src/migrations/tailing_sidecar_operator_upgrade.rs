//! tailing-sidecar-operator changed its chart between releases.

use serde_yaml::Value;
use tracing::warn;

use super::{MIGRATION_DOC, metrics_server_upgrade::configured};
use crate::{Error, lookup};

const CHANGELOG: &str = "https://github.com/SumoLogic/tailing-sidecar/blob/63e7c7f38e9e1edf1a105407b4aea8322101ab8a/CHANGELOG.md";

pub(crate) fn warning(values: &Value) -> Option<String> {
    configured(lookup(values, &["tailing-sidecar-operator"])).then(|| {
        format!(
            "WARNING! Changes in tailing-sidecar-operator detected, which may require manual migration\nFor details please see the following documentations:\n  - {MIGRATION_DOC}\n  - {CHANGELOG}"
        )
    })
}

/// Warn when tailing-sidecar-operator is configured. The document is
/// returned unchanged.
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

    use super::{migrate, warning};

    #[test]
    fn warns_when_configured() {
        let input = "tailing-sidecar-operator:\n  enabled: true\n";
        let values: Value = serde_yaml::from_str(input).unwrap();
        assert_eq!(
            warning(&values).unwrap(),
            "WARNING! Changes in tailing-sidecar-operator detected, which may require manual migration
For details please see the following documentations:
  - https://github.com/SumoLogic/sumologic-kubernetes-collection/blob/main/docs/v3-migration-doc.md
  - https://github.com/SumoLogic/tailing-sidecar/blob/63e7c7f38e9e1edf1a105407b4aea8322101ab8a/CHANGELOG.md"
        );
        assert_eq!(migrate(input).unwrap(), input);
    }

    #[test]
    fn silent_otherwise() {
        let values: Value = serde_yaml::from_str("tailing-sidecar-operator: {}\n").unwrap();
        assert!(warning(&values).is_none());
    }
}
