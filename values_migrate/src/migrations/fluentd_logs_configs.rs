//! Log source settings moved from `fluentd.logs` to `sumologic.logs`, where
//! they apply whichever log collector is in use.
//!
//! | from                      | to                                |
//! |---------------------------|-----------------------------------|
//! | `fluentd.logs.containers` | `sumologic.logs.container`        |
//! | `fluentd.logs.systemd`    | `sumologic.logs.systemd`          |
//! | `fluentd.logs.kubelet`    | `sumologic.logs.kubelet`          |
//! | `fluentd.logs.default`    | `sumologic.logs.defaultFluentd`   |
//!
//! Only the source settings move. Anything else in a Fluentd section stays
//! where it was. A section is moved only when it holds at least one source
//! setting, and then any source setting already present at the destination
//! is a conflict.

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::{
    Error,
    conflicts::{Conflicts, nested, rest_conflicts},
    emit, non_empty, parse,
};

const SOURCE_KEYS: [&str; 8] = [
    "sourceName",
    "sourceCategory",
    "sourceCategoryPrefix",
    "sourceCategoryReplaceDash",
    "excludeFacilityRegex",
    "excludeHostRegex",
    "excludePriorityRegex",
    "excludeUnitRegex",
];

const CONTAINER_KEYS: [&str; 10] = [
    "sourceName",
    "sourceCategory",
    "sourceCategoryPrefix",
    "sourceCategoryReplaceDash",
    "excludeFacilityRegex",
    "excludeHostRegex",
    "excludePriorityRegex",
    "excludeUnitRegex",
    "perContainerAnnotationsEnabled",
    "perContainerAnnotationPrefixes",
];

#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
struct Values {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sumologic: Option<Sumologic>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fluentd: Option<Fluentd>,
    #[serde(flatten)]
    rest: Mapping,
}

#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
struct Sumologic {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    logs: Option<SumologicLogs>,
    #[serde(flatten)]
    rest: Mapping,
}

#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct SumologicLogs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    container: Option<ContainersConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    systemd: Option<LogsConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kubelet: Option<LogsConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default_fluentd: Option<LogsConfig>,
    #[serde(flatten)]
    rest: Mapping,
}

impl Conflicts for SumologicLogs {
    fn collect_conflicts(&self, prefix: &str, found: &mut Vec<String>) {
        rest_conflicts(
            &self.rest,
            &["container", "systemd", "kubelet", "defaultFluentd"],
            prefix,
            found,
        );
        self.container
            .collect_conflicts(&nested(prefix, "container"), found);
        self.systemd.collect_conflicts(&nested(prefix, "systemd"), found);
        self.kubelet.collect_conflicts(&nested(prefix, "kubelet"), found);
        self.default_fluentd
            .collect_conflicts(&nested(prefix, "defaultFluentd"), found);
    }
}

#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
struct Fluentd {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    logs: Option<FluentdLogs>,
    #[serde(flatten)]
    rest: Mapping,
}

#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
struct FluentdLogs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    containers: Option<ContainersConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    systemd: Option<LogsConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kubelet: Option<LogsConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default: Option<LogsConfig>,
    #[serde(flatten)]
    rest: Mapping,
}

#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct LogsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_category_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_category_replace_dash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exclude_facility_regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exclude_host_regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exclude_priority_regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exclude_unit_regex: Option<String>,
    #[serde(flatten)]
    rest: Mapping,
}

#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct ContainersConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_category_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_category_replace_dash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exclude_facility_regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exclude_host_regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exclude_priority_regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exclude_unit_regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    per_container_annotations_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    per_container_annotation_prefixes: Option<Vec<String>>,
    #[serde(flatten)]
    rest: Mapping,
}

/// A section of source settings next to a catch-all mapping.
trait Section: Default + PartialEq + Serialize {
    fn rest_mut(&mut self) -> &mut Mapping;

    /// Separate the source settings from everything else.
    fn split(mut self) -> (Self, Mapping) {
        let rest = std::mem::take(self.rest_mut());
        (self, rest)
    }

    fn with_rest(mut self, rest: Mapping) -> Self {
        *self.rest_mut() = rest;
        self
    }
}

impl Section for LogsConfig {
    fn rest_mut(&mut self) -> &mut Mapping {
        &mut self.rest
    }
}

impl Section for ContainersConfig {
    fn rest_mut(&mut self) -> &mut Mapping {
        &mut self.rest
    }
}

impl Conflicts for LogsConfig {
    fn collect_conflicts(&self, prefix: &str, found: &mut Vec<String>) {
        rest_conflicts(&self.rest, &SOURCE_KEYS, prefix, found);
    }
}

impl Conflicts for ContainersConfig {
    fn collect_conflicts(&self, prefix: &str, found: &mut Vec<String>) {
        rest_conflicts(&self.rest, &CONTAINER_KEYS, prefix, found);
    }
}

/// Move the source settings of `fluentd` onto `existing`. Returns the new
/// destination section and what is left of the Fluentd section.
fn move_section<T>(fluentd: Option<T>, existing: Option<T>) -> Result<(Option<T>, Option<T>), Error>
where
    T: Section,
{
    let (settings, leftover) = fluentd.map(T::split).unwrap_or_default();
    let leftover = non_empty(leftover).map(|rest| T::default().with_rest(rest));
    if settings == T::default() {
        return Ok((existing, leftover));
    }
    // Everything already at the destination becomes the catch-all, so that
    // source settings set on both sides show up as conflicts.
    let rest = match existing.map(|existing| serde_yaml::to_value(&existing)).transpose()? {
        Some(Value::Mapping(rest)) => rest,
        _ => Mapping::new(),
    };
    Ok((Some(settings.with_rest(rest)), leftover))
}

/// Move log source settings from `fluentd.logs` to `sumologic.logs`.
///
/// # Errors
///
/// Function will return an error if the input is not valid YAML, a known key
/// holds a value of the wrong shape, or a setting is present in both places.
pub fn migrate(input: &str) -> Result<String, Error> {
    let mut values: Values = parse(input)?;
    let Some(mut fluentd) = values.fluentd.take() else {
        return Ok(input.to_string());
    };
    let Some(fluentd_logs) = fluentd.logs.take() else {
        return Ok(input.to_string());
    };
    let mut sumologic = values.sumologic.take().unwrap_or_default();
    let logs = sumologic.logs.take().unwrap_or_default();

    let (container, containers) = move_section(fluentd_logs.containers, logs.container)?;
    let (systemd, fluentd_systemd) = move_section(fluentd_logs.systemd, logs.systemd)?;
    let (kubelet, fluentd_kubelet) = move_section(fluentd_logs.kubelet, logs.kubelet)?;
    let (default_fluentd, fluentd_default) =
        move_section(fluentd_logs.default, logs.default_fluentd)?;

    let logs = SumologicLogs {
        container,
        systemd,
        kubelet,
        default_fluentd,
        rest: logs.rest,
    };
    logs.check_conflicts_at("sumologic.logs.")?;
    sumologic.logs = non_empty(logs);
    values.sumologic = non_empty(sumologic);

    fluentd.logs = non_empty(FluentdLogs {
        containers,
        systemd: fluentd_systemd,
        kubelet: fluentd_kubelet,
        default: fluentd_default,
        rest: fluentd_logs.rest,
    });
    values.fluentd = non_empty(fluentd);
    emit(&values)
}

#[cfg(test)]
mod test {
    use super::migrate;
    use crate::{Error, test::assert_yaml_eq};

    #[test]
    fn untouched_without_fluentd_logs() {
        for input in ["{}", "fluentd:\n  metrics:\n    enabled: true\n"] {
            assert_eq!(migrate(input).unwrap(), input);
        }
    }

    #[test]
    fn sections_move() {
        let input = r"
sumologic:
  accessId: id
  logs:
    container:
      format: json
    systemd:
      enabled: true
fluentd:
  image:
    tag: v1
  logs:
    containers:
      sourceCategory: containers
      perContainerAnnotationsEnabled: true
      perContainerAnnotationPrefixes:
        - sumologic.com/
      multiline:
        enabled: true
    systemd:
      sourceName: systemd
      excludeUnitRegex: kubelet
    kubelet:
      sourceCategoryPrefix: kube/
    default:
      sourceCategoryReplaceDash: /
    statefulset:
      replicaCount: 2
";
        let expected = r"
sumologic:
  accessId: id
  logs:
    container:
      format: json
      sourceCategory: containers
      perContainerAnnotationsEnabled: true
      perContainerAnnotationPrefixes:
        - sumologic.com/
    systemd:
      enabled: true
      sourceName: systemd
      excludeUnitRegex: kubelet
    kubelet:
      sourceCategoryPrefix: kube/
    defaultFluentd:
      sourceCategoryReplaceDash: /
fluentd:
  image:
    tag: v1
  logs:
    containers:
      multiline:
        enabled: true
    statefulset:
      replicaCount: 2
";
        assert_yaml_eq(&migrate(input).unwrap(), expected);
    }

    #[test]
    fn emptied_fluentd_is_removed() {
        let input = "fluentd:\n  logs:\n    kubelet:\n      sourceName: kubelet\n";
        assert_yaml_eq(
            &migrate(input).unwrap(),
            "sumologic:\n  logs:\n    kubelet:\n      sourceName: kubelet\n",
        );
    }

    #[test]
    fn sections_without_settings_stay() {
        let input = r"
sumologic:
  logs:
    container:
      sourceName: existing
fluentd:
  logs:
    containers:
      multiline:
        enabled: false
";
        assert_yaml_eq(&migrate(input).unwrap(), input);
    }

    #[test]
    fn settings_on_both_sides_conflict() {
        let input = r"
sumologic:
  logs:
    systemd:
      sourceName: existing
fluentd:
  logs:
    systemd:
      sourceCategory: systemd
";
        let err = migrate(input).unwrap_err();
        assert!(
            matches!(err, Error::Conflict(ref keys) if keys == &["sumologic.logs.systemd.sourceName"])
        );
    }
}
