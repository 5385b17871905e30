//! Kubernetes events collection moved under `sumologic.events`, shared by
//! both providers, with otelcol as the new default provider.

use serde::{Deserialize, Serialize};
use serde_yaml::Mapping;

use crate::{Error, emit, non_empty, parse};

#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
struct Values {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sumologic: Option<Sumologic>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fluentd: Option<Fluentd>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    otelevents: Option<Otelevents>,
    #[serde(flatten)]
    rest: Mapping,
}

#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
struct Sumologic {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    events: Option<Events>,
    #[serde(flatten)]
    rest: Mapping,
}

#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct Events {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    persistence: Option<Persistence>,
    #[serde(flatten)]
    rest: Mapping,
}

#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct Persistence {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    persistent_volume: Option<PersistentVolume>,
    #[serde(flatten)]
    rest: Mapping,
}

#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct PersistentVolume {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    storage_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pvc_labels: Option<Mapping>,
    #[serde(flatten)]
    rest: Mapping,
}

#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
struct Fluentd {
    #[serde(default, skip_serializing)]
    events: Option<FluentdEvents>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    persistence: Option<FluentdPersistence>,
    #[serde(flatten)]
    rest: Mapping,
}

#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct FluentdEvents {
    enabled: Option<bool>,
    source_name: Option<String>,
    source_category: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct FluentdPersistence {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    storage_class: Option<String>,
    #[serde(flatten)]
    rest: Mapping,
}

#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
struct Otelevents {
    #[serde(default, skip_serializing)]
    persistence: Option<OteleventsPersistence>,
    #[serde(flatten)]
    rest: Mapping,
}

#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct OteleventsPersistence {
    enabled: Option<bool>,
    size: Option<String>,
    access_mode: Option<String>,
    pvc_labels: Option<Mapping>,
}

const FLUENTD: &str = "fluentd";
const OTELCOL: &str = "otelcol";

fn migrate_events(
    events: Events,
    fluentd_events: FluentdEvents,
    fluentd_persistence: Option<&FluentdPersistence>,
    otelevents_persistence: OteleventsPersistence,
) -> Events {
    let enabled = events.enabled.or(fluentd_events.enabled).unwrap_or(true);
    let provider = events.provider.filter(|provider| provider != OTELCOL);

    let mut persistence = events.persistence.unwrap_or_default();
    let mut volume = persistence.persistent_volume.take().unwrap_or_default();
    if provider.as_deref() == Some(FLUENTD) {
        if let Some(fluentd) = fluentd_persistence {
            persistence.enabled = fluentd.enabled.or(persistence.enabled);
            persistence.size = fluentd.size.clone().or(persistence.size);
            volume.access_mode = fluentd.access_mode.clone().or(volume.access_mode);
            volume.storage_class = fluentd.storage_class.clone().or(volume.storage_class);
        }
    } else {
        persistence.enabled = otelevents_persistence.enabled.or(persistence.enabled);
        persistence.size = otelevents_persistence.size.or(persistence.size);
        volume.access_mode = otelevents_persistence.access_mode.or(volume.access_mode);
        volume.pvc_labels = otelevents_persistence
            .pvc_labels
            .filter(|labels| !labels.is_empty())
            .or(volume.pvc_labels);
    }
    persistence.persistent_volume = non_empty(volume);

    Events {
        enabled: (!enabled).then_some(false),
        provider,
        source_name: fluentd_events.source_name.or(events.source_name),
        source_category: fluentd_events.source_category.or(events.source_category),
        persistence: non_empty(persistence),
        rest: events.rest,
    }
}

/// Move events configuration from `fluentd` and `otelevents` into
/// `sumologic.events`.
///
/// # Errors
///
/// Function will return an error if the input is not valid YAML or a known
/// key holds a value of the wrong shape.
pub fn migrate(input: &str) -> Result<String, Error> {
    let values: Values = parse(input)?;
    let mut sumologic = values.sumologic.unwrap_or_default();
    let mut fluentd = values.fluentd.unwrap_or_default();
    let mut otelevents = values.otelevents.unwrap_or_default();

    let events = migrate_events(
        sumologic.events.take().unwrap_or_default(),
        fluentd.events.take().unwrap_or_default(),
        fluentd.persistence.as_ref(),
        otelevents.persistence.take().unwrap_or_default(),
    );
    sumologic.events = non_empty(events);

    emit(&Values {
        sumologic: non_empty(sumologic),
        fluentd: non_empty(fluentd),
        otelevents: non_empty(otelevents),
        rest: values.rest,
    })
}

#[cfg(test)]
mod test {
    use super::migrate;
    use crate::test::assert_yaml_eq;

    fn check(input: &str, expected: &str) {
        assert_yaml_eq(&migrate(input).unwrap(), expected);
    }

    #[test]
    fn enabled_is_the_default() {
        check("sumologic:\n  events:\n    enabled: true\n", "{}");
        check(
            "sumologic:\n  events:\n    enabled: false\n",
            "sumologic:\n  events:\n    enabled: false\n",
        );
    }

    #[test]
    fn fluentd_toggle_is_the_fallback() {
        check(
            "fluentd:\n  events:\n    enabled: false\n",
            "sumologic:\n  events:\n    enabled: false\n",
        );
        check(
            "sumologic:\n  events:\n    enabled: true\nfluentd:\n  events:\n    enabled: false\n",
            "{}",
        );
    }

    #[test]
    fn otelcol_provider_is_the_default() {
        check(
            "sumologic:\n  events:\n    enabled: true\n    provider: otelcol\n",
            "{}",
        );
        check(
            "sumologic:\n  events:\n    provider: fluentd\n",
            "sumologic:\n  events:\n    provider: fluentd\n",
        );
    }

    #[test]
    fn source_metadata_moves() {
        let input = r"
fluentd:
  events:
    sourceName: my-events
    sourceCategory: my-category
  logs:
    enabled: true
";
        let expected = r"
sumologic:
  events:
    sourceName: my-events
    sourceCategory: my-category
fluentd:
  logs:
    enabled: true
";
        check(input, expected);
    }

    #[test]
    fn otelcol_persistence() {
        let input = r"
otelevents:
  persistence:
    enabled: true
    size: 10Gi
    accessMode: ReadWriteOnce
    pvcLabels:
      team: a
  image:
    tag: v1
fluentd:
  persistence:
    enabled: true
    size: 5Gi
";
        let expected = r"
sumologic:
  events:
    persistence:
      enabled: true
      size: 10Gi
      persistentVolume:
        accessMode: ReadWriteOnce
        pvcLabels:
          team: a
otelevents:
  image:
    tag: v1
fluentd:
  persistence:
    enabled: true
    size: 5Gi
";
        check(input, expected);
    }

    #[test]
    fn fluentd_persistence() {
        let input = r"
sumologic:
  events:
    provider: fluentd
fluentd:
  persistence:
    enabled: true
    size: 5Gi
    accessMode: ReadWriteMany
    storageClass: gp2
otelevents:
  persistence:
    size: 10Gi
";
        let expected = r"
sumologic:
  events:
    provider: fluentd
    persistence:
      enabled: true
      size: 5Gi
      persistentVolume:
        accessMode: ReadWriteMany
        storageClass: gp2
fluentd:
  persistence:
    enabled: true
    size: 5Gi
    accessMode: ReadWriteMany
    storageClass: gp2
";
        check(input, expected);
    }

    #[test]
    fn unrelated_keys_survive() {
        let input = "sumologic:\n  accessId: id\n  events:\n    extra: 1\nother: 2\n";
        check(input, input);
    }
}
