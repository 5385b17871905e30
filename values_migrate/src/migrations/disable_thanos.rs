//! Thanos support was removed from the bundled Prometheus.

use serde_yaml::Value;

use crate::{Error, remove_path};

const THANOS: [&str; 4] = ["kube-prometheus-stack", "prometheus", "prometheusSpec", "thanos"];

/// Remove the Prometheus thanos section, and any parent it leaves empty.
///
/// # Errors
///
/// Function will return an error if the input is not valid YAML.
pub fn migrate(input: &str) -> Result<String, Error> {
    let mut values: Value = serde_yaml::from_str(input)?;
    if remove_path(&mut values, &THANOS).is_none() {
        return Ok(input.to_string());
    }
    Ok(serde_yaml::to_string(&values)?)
}

#[cfg(test)]
mod test {
    use super::migrate;
    use crate::test::assert_yaml_eq;

    #[test]
    fn removes_thanos() {
        let input = r"
kube-prometheus-stack:
  prometheus:
    prometheusSpec:
      thanos:
        baseImage: quay.io/thanos/thanos
        version: v0.25.2
      retention: 1d
";
        assert_yaml_eq(
            &migrate(input).unwrap(),
            "kube-prometheus-stack:\n  prometheus:\n    prometheusSpec:\n      retention: 1d\n",
        );
    }

    #[test]
    fn prunes_emptied_parents() {
        let input = r"
sumologic:
  accessId: id
kube-prometheus-stack:
  prometheus:
    prometheusSpec:
      thanos: {}
";
        assert_yaml_eq(&migrate(input).unwrap(), "sumologic:\n  accessId: id\n");
    }

    #[test]
    fn untouched_without_thanos() {
        let input = "kube-prometheus-stack:\n  prometheus:\n    enabled: true\n";
        assert_eq!(migrate(input).unwrap(), input);
    }
}
