//! The single traces otelcol was split into an instrumentation collector and
//! a traces sampler. The source processor belongs to the former, the
//! cascading filter to the latter.

use serde_yaml::{Mapping, Value};

use crate::{Error, lookup, remove_path};

const MOVES: [(&[&str], &[&str]); 2] = [
    (
        &["otelcol", "config", "processors", "source"],
        &["otelcolInstrumentation", "config", "processors", "source"],
    ),
    (
        &["otelcol", "config", "processors", "cascading_filter"],
        &["tracesSampler", "config", "processors", "cascading_filter"],
    ),
];

/// Set `path` to `new`, creating mappings on the way. Does nothing if some
/// step of the way is not a mapping.
fn insert_path(value: &mut Value, path: &[&str], new: Value) {
    let Some((key, tail)) = path.split_first() else {
        return;
    };
    if value.is_null() {
        *value = Value::Mapping(Mapping::new());
    }
    let Some(mapping) = value.as_mapping_mut() else {
        return;
    };
    if tail.is_empty() {
        mapping.insert(Value::from(*key), new);
        return;
    }
    let key = Value::from(*key);
    if !mapping.contains_key(&key) {
        mapping.insert(key.clone(), Value::Mapping(Mapping::new()));
    }
    if let Some(child) = mapping.get_mut(&key) {
        insert_path(child, tail, new);
    }
}

/// Move the otelcol source processor and cascading filter to their new
/// homes. What is left of `otelcol` is kept.
///
/// # Errors
///
/// Function will return an error if the input is not valid YAML or if a
/// destination is already set.
pub fn migrate(input: &str) -> Result<String, Error> {
    let mut values: Value = serde_yaml::from_str(input)?;
    let conflicts: Vec<String> = MOVES
        .iter()
        .filter(|(from, to)| lookup(&values, from).is_some() && lookup(&values, to).is_some())
        .map(|(_, to)| to.join("."))
        .collect();
    if !conflicts.is_empty() {
        return Err(Error::Conflict(conflicts));
    }

    let mut moved = false;
    for (from, to) in MOVES {
        if let Some(processor) = remove_path(&mut values, from) {
            insert_path(&mut values, to, processor);
            moved = true;
        }
    }
    if !moved {
        return Ok(input.to_string());
    }
    Ok(serde_yaml::to_string(&values)?)
}

#[cfg(test)]
mod test {
    use super::migrate;
    use crate::{Error, test::assert_yaml_eq};

    #[test]
    fn processors_move() {
        let input = r"
otelcol:
  deployment:
    replicas: 2
  config:
    processors:
      source:
        collector: my-collector
      cascading_filter:
        spans_per_second: 200
      batch:
        timeout: 1s
";
        let expected = r"
otelcol:
  deployment:
    replicas: 2
  config:
    processors:
      batch:
        timeout: 1s
otelcolInstrumentation:
  config:
    processors:
      source:
        collector: my-collector
tracesSampler:
  config:
    processors:
      cascading_filter:
        spans_per_second: 200
";
        assert_yaml_eq(&migrate(input).unwrap(), expected);
    }

    #[test]
    fn destination_siblings_are_kept() {
        let input = r"
otelcol:
  config:
    processors:
      cascading_filter:
        spans_per_second: 200
tracesSampler:
  config:
    exporters: {}
";
        let expected = r"
tracesSampler:
  config:
    exporters: {}
    processors:
      cascading_filter:
        spans_per_second: 200
";
        assert_yaml_eq(&migrate(input).unwrap(), expected);
    }

    #[test]
    fn set_destination_conflicts() {
        let input = r"
otelcol:
  config:
    processors:
      source: {a: b}
otelcolInstrumentation:
  config:
    processors:
      source: {c: d}
";
        assert!(matches!(
            migrate(input),
            Err(Error::Conflict(ref keys)) if keys == &["otelcolInstrumentation.config.processors.source"]
        ));
    }

    #[test]
    fn untouched_without_processors() {
        let input = "otelcol:\n  enabled: true\n";
        assert_eq!(migrate(input).unwrap(), input);
    }
}
