//! The container log format moved from the Fluentd output to
//! `sumologic.logs.container.format`.

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::{Error, emit, non_empty, parse};

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
struct SumologicLogs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    container: Option<Container>,
    #[serde(flatten)]
    rest: Mapping,
}

#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
struct Container {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    format: Option<Value>,
    #[serde(flatten)]
    rest: Mapping,
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
    output: Option<Output>,
    #[serde(flatten)]
    rest: Mapping,
}

#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct Output {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    log_format: Option<Value>,
    #[serde(flatten)]
    rest: Mapping,
}

/// Move `fluentd.logs.output.logFormat` to `sumologic.logs.container.format`
/// unless the latter is already set.
///
/// # Errors
///
/// Function will return an error if the input is not valid YAML or a known
/// key holds a value of the wrong shape.
pub fn migrate(input: &str) -> Result<String, Error> {
    let mut values: Values = parse(input)?;
    let Some(mut fluentd) = values.fluentd.take() else {
        return Ok(input.to_string());
    };
    let mut logs = fluentd.logs.take().unwrap_or_default();
    let mut output = logs.output.take().unwrap_or_default();
    let Some(log_format) = output.log_format.take() else {
        return Ok(input.to_string());
    };

    logs.output = non_empty(output);
    fluentd.logs = non_empty(logs);
    values.fluentd = non_empty(fluentd);

    values
        .sumologic
        .get_or_insert_with(Sumologic::default)
        .logs
        .get_or_insert_with(SumologicLogs::default)
        .container
        .get_or_insert_with(Container::default)
        .format
        .get_or_insert(log_format);
    emit(&values)
}

#[cfg(test)]
mod test {
    use super::migrate;
    use crate::test::assert_yaml_eq;

    #[test]
    fn format_moves() {
        let input = r"
fluentd:
  logs:
    output:
      logFormat: fields
";
        let expected = r"
sumologic:
  logs:
    container:
      format: fields
";
        assert_yaml_eq(&migrate(input).unwrap(), expected);
    }

    #[test]
    fn existing_format_wins_and_siblings_stay() {
        let input = r"
sumologic:
  logs:
    container:
      format: json
fluentd:
  logs:
    output:
      logFormat: text
      addTimestamp: true
";
        let expected = r"
sumologic:
  logs:
    container:
      format: json
fluentd:
  logs:
    output:
      addTimestamp: true
";
        assert_yaml_eq(&migrate(input).unwrap(), expected);
    }

    #[test]
    fn untouched_without_log_format() {
        let input = "fluentd:\n  logs:\n    output:\n      addTimestamp: true\n";
        assert_eq!(migrate(input).unwrap(), input);
    }
}
