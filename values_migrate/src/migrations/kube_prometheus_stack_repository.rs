//! kube-prometheus-stack 42 moved image repositories into a registry and
//! repository pair, which cannot be split automatically.

use serde_yaml::Value;
use tracing::warn;

use super::MIGRATION_DOC;
use crate::{Error, lookup};

const UPSTREAM_DOC: &str = "https://github.com/prometheus-community/helm-charts/tree/kube-prometheus-stack-42.1.0/charts/kube-prometheus-stack#from-41x-to-42x";

const REPOSITORIES: [&[&str]; 7] = [
    &["alertmanager", "alertmanagerSpec", "image", "repository"],
    &["prometheusOperator", "admissionWebhooks", "patch", "image", "repository"],
    &["prometheusOperator", "image", "repository"],
    &["prometheusOperator", "prometheusConfigReloader", "image", "repository"],
    &["prometheusOperator", "thanosImage", "repository"],
    &["prometheus", "prometheusSpec", "image", "repository"],
    &["thanosRuler", "thanosRulerSpec", "image", "repository"],
];

/// The warning for `values`, if any repository is set.
pub(crate) fn warning(values: &Value) -> Option<String> {
    let stack = lookup(values, &["kube-prometheus-stack"])?;
    let mut found: Vec<String> = REPOSITORIES
        .iter()
        .filter(|path| lookup(stack, path).is_some())
        .map(|path| path.join("."))
        .collect();
    if found.is_empty() {
        return None;
    }
    found.sort();
    Some(format!(
        "WARNING! Found following values in kube-prometheus-stack configuration which must be manually migrated:\n{}\nfor details please see the following documentations:\n  - {MIGRATION_DOC}\n  - {UPSTREAM_DOC}",
        found.join("\n")
    ))
}

/// Warn about image repositories that need manual attention. The document is
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
