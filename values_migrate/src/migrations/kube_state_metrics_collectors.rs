//! `kube-state-metrics` takes the list of collectors to run instead of a map
//! of collector toggles.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_yaml::Mapping;

use crate::{Error, emit, non_empty, parse};

/// Every collector kube-state-metrics runs by default.
pub const COLLECTORS: [&str; 27] = [
    "certificatesigningrequests",
    "configmaps",
    "cronjobs",
    "daemonsets",
    "deployments",
    "endpoints",
    "horizontalpodautoscalers",
    "ingresses",
    "jobs",
    "limitranges",
    "mutatingwebhookconfigurations",
    "namespaces",
    "networkpolicies",
    "nodes",
    "persistentvolumeclaims",
    "persistentvolumes",
    "poddisruptionbudgets",
    "pods",
    "replicasets",
    "replicationcontrollers",
    "resourcequotas",
    "secrets",
    "services",
    "statefulsets",
    "storageclasses",
    "validatingwebhookconfigurations",
    "volumeattachments",
];

#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
struct Values<C> {
    #[serde(
        rename = "kube-prometheus-stack",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    kube_prometheus_stack: Option<KubePrometheusStack<C>>,
    #[serde(flatten)]
    rest: Mapping,
}

#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
struct KubePrometheusStack<C> {
    #[serde(
        rename = "kube-state-metrics",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    kube_state_metrics: Option<KubeStateMetrics<C>>,
    #[serde(flatten)]
    rest: Mapping,
}

#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
struct KubeStateMetrics<C> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    collectors: Option<C>,
    #[serde(flatten)]
    rest: Mapping,
}

/// The enabled collectors, or `None` when no default collector is disabled.
fn enabled_collectors(toggles: &FxHashMap<String, bool>) -> Option<Vec<String>> {
    let mut disabled = false;
    let mut enabled = Vec::with_capacity(COLLECTORS.len());
    for name in COLLECTORS {
        if toggles.get(name) == Some(&false) {
            disabled = true;
        } else {
            enabled.push(name.to_string());
        }
    }
    disabled.then_some(enabled)
}

/// Convert the collector toggles into a collector list.
///
/// # Errors
///
/// Function will return an error if the input is not valid YAML or the
/// toggles are not a map of booleans.
pub fn migrate(input: &str) -> Result<String, Error> {
    let values: Values<FxHashMap<String, bool>> = parse(input)?;
    let kube_prometheus_stack = values.kube_prometheus_stack.map(|stack| KubePrometheusStack {
        kube_state_metrics: stack.kube_state_metrics.and_then(|ksm| {
            non_empty(KubeStateMetrics {
                collectors: ksm.collectors.as_ref().and_then(enabled_collectors),
                rest: ksm.rest,
            })
        }),
        rest: stack.rest,
    });
    emit(&Values {
        kube_prometheus_stack: kube_prometheus_stack.and_then(non_empty),
        rest: values.rest,
    })
}

#[cfg(test)]
mod test {
    use serde_yaml::Value;

    use super::{COLLECTORS, migrate};
    use crate::test::assert_yaml_eq;

    #[test]
    fn disabled_collectors_are_left_out() {
        let input = r"
kube-prometheus-stack:
  kube-state-metrics:
    collectors:
      pods: false
      nodes: true
      secrets: false
    image:
      tag: v2
";
        let output: Value = serde_yaml::from_str(&migrate(input).unwrap()).unwrap();
        let ksm = &output["kube-prometheus-stack"]["kube-state-metrics"];
        let collectors: Vec<String> = serde_yaml::from_value(ksm["collectors"].clone()).unwrap();
        assert_eq!(collectors.len(), 25);
        assert!(!collectors.iter().any(|c| c == "pods" || c == "secrets"));
        assert_eq!(collectors[0], COLLECTORS[0]);
        assert_eq!(ksm["image"]["tag"], Value::from("v2"));
    }

    #[test]
    fn all_enabled_drops_collectors() {
        let input = r"
kube-prometheus-stack:
  kube-state-metrics:
    collectors:
      pods: true
  prometheus:
    enabled: false
";
        assert_yaml_eq(
            &migrate(input).unwrap(),
            "kube-prometheus-stack:\n  prometheus:\n    enabled: false\n",
        );
    }

    #[test]
    fn untouched_without_collectors() {
        let input = "sumologic:\n  accessId: id\n";
        assert_yaml_eq(&migrate(input).unwrap(), input);
    }
}
