//! `sumologic.cluster.load_config_file` no longer exists.

use serde_yaml::Value;

use crate::{Error, remove_path};

/// Drop `sumologic.cluster.load_config_file`.
///
/// # Errors
///
/// Function will return an error if the input is not valid YAML.
pub fn migrate(input: &str) -> Result<String, Error> {
    let mut values: Value = serde_yaml::from_str(input)?;
    if remove_path(&mut values, &["sumologic", "cluster", "load_config_file"]).is_none() {
        return Ok(input.to_string());
    }
    Ok(serde_yaml::to_string(&values)?)
}

#[cfg(test)]
mod test {
    use super::migrate;
    use crate::test::assert_yaml_eq;

    #[test]
    fn removes_key() {
        let input = r"
sumologic:
  cluster:
    load_config_file: true
    host: https://kubernetes.default.svc
";
        assert_yaml_eq(
            &migrate(input).unwrap(),
            "sumologic:\n  cluster:\n    host: https://kubernetes.default.svc\n",
        );
        assert_yaml_eq(
            &migrate("sumologic:\n  cluster:\n    load_config_file: false\n").unwrap(),
            "{}",
        );
    }
}
