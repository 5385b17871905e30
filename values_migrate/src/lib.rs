//! Migration of Sumo Logic Kubernetes Collection `values.yaml` from the v2
//! to the v3 schema.
//!
//! A migration is a pure function from one YAML document to another. Each
//! one deserializes only the keys it cares about into typed structs, leaving
//! everything else in a flattened `rest` mapping that is written back out
//! untouched. [`MIGRATIONS`] lists every migration in the order [`migrate`]
//! applies them. Once the pipeline is done the document's keys are put back
//! into the order of a blueprint, by default the input itself, so that a user
//! reading the result finds their keys where they left them.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![allow(clippy::multiple_crate_versions)]

use serde::{Serialize, de::DeserializeOwned};
use serde_yaml::{Mapping, Value};
use tracing::debug;

pub mod conflicts;
pub mod migrations;
pub mod reorder;

/// Errors produced by a migration.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The document is not valid YAML, or a typed key holds a value of the
    /// wrong shape.
    #[error("Failed to process yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    /// Reading or writing a values file failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// A key ended up both in a typed field and in the catch-all mapping
    /// beside it.
    #[error("conflict between input and output values for the following keys: {}", .0.join(", "))]
    Conflict(Vec<String>),
    /// A migration in the pipeline failed.
    #[error("migration {name} failed: {source}")]
    Migration {
        /// Name of the failing migration
        name: &'static str,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },
}

/// A named transformation of a values document.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    /// Name of the migration, as reported in logs and errors
    pub name: &'static str,
    /// The transformation itself
    pub transform: fn(&str) -> Result<String, Error>,
}

/// Every migration, in the order [`migrate`] applies them.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "kube-state-metrics-collectors",
        transform: migrations::kube_state_metrics_collectors::migrate,
    },
    Migration {
        name: "kube-prometheus-stack-repository",
        transform: migrations::kube_prometheus_stack_repository::migrate,
    },
    Migration {
        name: "disable-thanos",
        transform: migrations::disable_thanos::migrate,
    },
    Migration {
        name: "metrics-server-upgrade",
        transform: migrations::metrics_server_upgrade::migrate,
    },
    Migration {
        name: "events",
        transform: migrations::events::migrate,
    },
    Migration {
        name: "events-config-merge",
        transform: migrations::config_merge::migrate_otelevents,
    },
    Migration {
        name: "logs-metadata-config",
        transform: migrations::metadata_config::migrate_logs,
    },
    Migration {
        name: "metrics-metadata-config",
        transform: migrations::metadata_config::migrate_metrics,
    },
    Migration {
        name: "otellogs-config-merge",
        transform: migrations::config_merge::migrate_otellogs,
    },
    Migration {
        name: "fluentd-autoscaling",
        transform: migrations::fluentd_autoscaling::migrate,
    },
    Migration {
        name: "logformat",
        transform: migrations::logformat::migrate,
    },
    Migration {
        name: "fluentd-logs-configs",
        transform: migrations::fluentd_logs_configs::migrate,
    },
    Migration {
        name: "remove-load-config-file",
        transform: migrations::remove_load_config_file::migrate,
    },
    Migration {
        name: "falco-upgrade",
        transform: migrations::falco_upgrade::migrate,
    },
    Migration {
        name: "tailing-sidecar-operator-upgrade",
        transform: migrations::tailing_sidecar_operator_upgrade::migrate,
    },
    Migration {
        name: "tracing-objects-changes",
        transform: migrations::tracing_objects_changes::migrate,
    },
    Migration {
        name: "tracing-replaces",
        transform: migrations::tracing_replaces::migrate,
    },
    Migration {
        name: "tracing-config",
        transform: migrations::tracing_config::migrate,
    },
];

/// Run every migration over `input` and restore the input's key order.
///
/// # Errors
///
/// Function will return an error if `input` is not valid YAML or if any
/// migration fails.
pub fn migrate(input: &str) -> Result<String, Error> {
    migrate_with_blueprint(input, input)
}

/// Run every migration over `input` and order the result's keys after
/// `blueprint`.
///
/// # Errors
///
/// Function will return an error if either document is not valid YAML or if
/// any migration fails.
pub fn migrate_with_blueprint(input: &str, blueprint: &str) -> Result<String, Error> {
    let blueprint: Value = serde_yaml::from_str(blueprint)?;
    let mut output = input.to_string();
    for migration in MIGRATIONS {
        debug!(migration = migration.name, "applying migration");
        output = (migration.transform)(&output).map_err(|source| Error::Migration {
            name: migration.name,
            source: Box::new(source),
        })?;
    }
    let output: Value = serde_yaml::from_str(&output)?;
    Ok(serde_yaml::to_string(&reorder::reorder(output, &blueprint))?)
}

/// Deserialize `input`, treating an empty document as the default value.
pub(crate) fn parse<T>(input: &str) -> Result<T, Error>
where
    T: DeserializeOwned + Default,
{
    let value: Value = serde_yaml::from_str(input)?;
    if value.is_null() {
        return Ok(T::default());
    }
    Ok(serde_yaml::from_value(value)?)
}

pub(crate) fn emit<T>(values: &T) -> Result<String, Error>
where
    T: Serialize,
{
    Ok(serde_yaml::to_string(values)?)
}

/// `None` when `value` holds nothing, so that emptied sections drop out of
/// the output.
pub(crate) fn non_empty<T>(value: T) -> Option<T>
where
    T: Default + PartialEq,
{
    (value != T::default()).then_some(value)
}

/// The value at `path`, if it is set to anything but null.
pub(crate) fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter()
        .try_fold(value, |value, key| value.get(*key))
        .filter(|value| !value.is_null())
}

/// Remove the value at `path`, then remove every parent mapping the removal
/// left empty.
pub(crate) fn remove_path(value: &mut Value, path: &[&str]) -> Option<Value> {
    let (key, tail) = path.split_first()?;
    let mapping = value.as_mapping_mut()?;
    if tail.is_empty() {
        return mapping.remove(*key);
    }
    let child = mapping.get_mut(*key)?;
    let removed = remove_path(child, tail)?;
    if child.as_mapping().is_some_and(Mapping::is_empty) {
        mapping.remove(*key);
    }
    Some(removed)
}

#[cfg(test)]
pub(crate) mod test {
    use serde_yaml::Value;

    use super::{lookup, migrate, migrate_with_blueprint, remove_path};

    /// Compare two documents as YAML values, ignoring formatting and key
    /// order.
    pub(crate) fn assert_yaml_eq(actual: &str, expected: &str) {
        let actual_value: Value = serde_yaml::from_str(actual).unwrap();
        let expected_value: Value = serde_yaml::from_str(expected).unwrap();
        assert_eq!(actual_value, expected_value, "actual document:\n{actual}");
    }

    #[test]
    fn lookup_skips_null() {
        let value: Value = serde_yaml::from_str("a:\n  b: 1\n  c: null\n").unwrap();
        assert_eq!(lookup(&value, &["a", "b"]), Some(&Value::from(1)));
        assert!(lookup(&value, &["a", "c"]).is_none());
        assert!(lookup(&value, &["a", "b", "c"]).is_none());
        assert!(lookup(&value, &["x"]).is_none());
    }

    #[test]
    fn remove_path_prunes_parents() {
        let mut value: Value = serde_yaml::from_str("a:\n  b:\n    c: 1\nd: 2\n").unwrap();
        assert_eq!(remove_path(&mut value, &["a", "b", "c"]), Some(Value::from(1)));
        assert_yaml_eq(&serde_yaml::to_string(&value).unwrap(), "d: 2");

        let mut value: Value = serde_yaml::from_str("a:\n  b:\n    c: 1\n  e: 3\n").unwrap();
        remove_path(&mut value, &["a", "b", "c"]);
        assert_yaml_eq(&serde_yaml::to_string(&value).unwrap(), "a:\n  e: 3");

        assert!(remove_path(&mut value, &["a", "missing"]).is_none());
    }

    #[test]
    fn empty_document_migrates_to_empty_mapping() {
        assert_yaml_eq(&migrate("").unwrap(), "{}");
        assert_yaml_eq(&migrate("{}").unwrap(), "{}");
    }

    #[test]
    fn full_pipeline() {
        let input = r"
sumologic:
  accessId: id
  accessKey: key
  cluster:
    load_config_file: true
  events:
    provider: otelcol
fluentd:
  logs:
    output:
      logFormat: json
    containers:
      sourceCategory: containers
  events:
    sourceName: events
kube-prometheus-stack:
  kube-state-metrics:
    collectors:
      secrets: false
  prometheus:
    prometheusSpec:
      thanos:
        baseImage: quay.io/thanos/thanos
metadata:
  logs:
    config:
      foo: bar
otelevents:
  config:
    override:
      baz: qux
";
        let expected = r"
sumologic:
  accessId: id
  accessKey: key
  events:
    sourceName: events
  logs:
    container:
      format: json
      sourceCategory: containers
kube-prometheus-stack:
  kube-state-metrics:
    collectors:
      - certificatesigningrequests
      - configmaps
      - cronjobs
      - daemonsets
      - deployments
      - endpoints
      - horizontalpodautoscalers
      - ingresses
      - jobs
      - limitranges
      - mutatingwebhookconfigurations
      - namespaces
      - networkpolicies
      - nodes
      - persistentvolumeclaims
      - persistentvolumes
      - poddisruptionbudgets
      - pods
      - replicasets
      - replicationcontrollers
      - resourcequotas
      - services
      - statefulsets
      - storageclasses
      - validatingwebhookconfigurations
      - volumeattachments
metadata:
  logs:
    config:
      merge:
        foo: bar
otelevents:
  config:
    merge:
      baz: qux
";
        let output = migrate(input).unwrap();
        assert_yaml_eq(&output, expected);

        let keys: Vec<_> = serde_yaml::from_str::<Value>(&output)
            .unwrap()
            .as_mapping()
            .unwrap()
            .keys()
            .map(|k| k.as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            keys,
            vec!["sumologic", "kube-prometheus-stack", "metadata", "otelevents"]
        );
    }

    #[test]
    fn blueprint_orders_output() {
        let output = migrate_with_blueprint("b: 1\na: 2\nc: 3\n", "c: 0\nb: 0\n").unwrap();
        assert_eq!(output, "c: 3\nb: 1\na: 2\n");
    }

    #[test]
    fn failing_migration_is_named() {
        let input = "otelevents:\n  config:\n    override:\n      a: b\n    merge:\n      c: d\n";
        let err = migrate(input).unwrap_err();
        assert_eq!(
            err.to_string(),
            "migration events-config-merge failed: conflict between input and output values for the following keys: otelevents.config.merge"
        );
    }
}
