//! Autoscaling moved from the Fluentd StatefulSets to the metadata
//! StatefulSets that replace them.

use serde::{Deserialize, Serialize};
use serde_yaml::Mapping;

use crate::{Error, emit, parse};

#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
struct Values {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<Sections>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fluentd: Option<Sections>,
    #[serde(flatten)]
    rest: Mapping,
}

#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
struct Sections {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    logs: Option<Section>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metrics: Option<Section>,
    #[serde(flatten)]
    rest: Mapping,
}

#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
struct Section {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    autoscaling: Option<Autoscaling>,
    #[serde(flatten)]
    rest: Mapping,
}

#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
struct Autoscaling {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    enabled: Option<bool>,
    #[serde(flatten)]
    rest: Mapping,
}

fn autoscaled(section: Option<&Section>) -> bool {
    section
        .and_then(|section| section.autoscaling.as_ref())
        .and_then(|autoscaling| autoscaling.enabled)
        == Some(true)
}

/// Turn autoscaling on, unless the user already decided either way.
fn enable(section: &mut Option<Section>) {
    section
        .get_or_insert_with(Section::default)
        .autoscaling
        .get_or_insert_with(Autoscaling::default)
        .enabled
        .get_or_insert(true);
}

/// Enable metadata autoscaling wherever Fluentd autoscaling was enabled.
/// Fluentd configuration itself is kept.
///
/// # Errors
///
/// Function will return an error if the input is not valid YAML or a known
/// key holds a value of the wrong shape.
pub fn migrate(input: &str) -> Result<String, Error> {
    let mut values: Values = parse(input)?;
    let Some(fluentd) = &values.fluentd else {
        return Ok(input.to_string());
    };
    let logs = autoscaled(fluentd.logs.as_ref());
    let metrics = autoscaled(fluentd.metrics.as_ref());
    if !logs && !metrics {
        return Ok(input.to_string());
    }

    let metadata = values.metadata.get_or_insert_with(Sections::default);
    if logs {
        enable(&mut metadata.logs);
    }
    if metrics {
        enable(&mut metadata.metrics);
    }
    emit(&values)
}

#[cfg(test)]
mod test {
    use super::migrate;
    use crate::test::assert_yaml_eq;

    #[test]
    fn nothing_to_do() {
        for input in [
            "{}",
            "fluentd:\n  key: value\n",
            "fluentd:\n  logs:\n    key: value\n  metrics:\n    key: value\n",
            "fluentd:\n  logs:\n    autoscaling:\n      minReplicas: 5\n",
            "fluentd:\n  logs:\n    autoscaling:\n      enabled: false\n",
            "metadata:\n  logs:\n    autoscaling:\n      enabled: true\n",
        ] {
            assert_eq!(migrate(input).unwrap(), input);
        }
    }

    #[test]
    fn autoscaling_moves_to_metadata() {
        let input = r"
fluentd:
  logs:
    autoscaling:
      enabled: true
      minReplicas: 5
  metrics:
    autoscaling:
      enabled: true
      minReplicas: 5
";
        let expected = r"
metadata:
  logs:
    autoscaling:
      enabled: true
  metrics:
    autoscaling:
      enabled: true
fluentd:
  logs:
    autoscaling:
      enabled: true
      minReplicas: 5
  metrics:
    autoscaling:
      enabled: true
      minReplicas: 5
";
        assert_yaml_eq(&migrate(input).unwrap(), expected);
    }

    #[test]
    fn explicit_metadata_setting_wins() {
        let input = r"
metadata:
  metrics:
    autoscaling:
      enabled: false
      maxReplicas: 3
fluentd:
  metrics:
    autoscaling:
      enabled: true
";
        assert_yaml_eq(&migrate(input).unwrap(), input);
    }
}
