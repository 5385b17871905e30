//! The Falco subchart moved to a release that renamed several keys.

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use tracing::{info, warn};

use crate::{Error, emit, non_empty, parse};

const FALCO_CHART: &str = "https://github.com/falcosecurity/charts/tree/falco-2.4.2/falco";

#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
struct Values {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    falco: Option<Falco>,
    #[serde(flatten)]
    rest: Mapping,
}

#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct Falco {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    image: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    extra_init_containers: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    extra: Option<Extra>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    falco: Option<FalcoSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ebpf: Option<Ebpf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    driver: Option<Driver>,
    #[serde(flatten)]
    rest: Mapping,
}

#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct Extra {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    init_containers: Option<Value>,
    #[serde(flatten)]
    rest: Mapping,
}

#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
struct FalcoSettings {
    #[serde(rename = "jsonOutput", default, skip_serializing_if = "Option::is_none")]
    json_output_old: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    json_output: Option<Value>,
    #[serde(rename = "rulesFile", default, skip_serializing_if = "Option::is_none")]
    rules_file_old: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rules_file: Option<Value>,
    #[serde(flatten)]
    rest: Mapping,
}

#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
struct Ebpf {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    enabled: Option<bool>,
    #[serde(flatten)]
    rest: Mapping,
}

#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
struct Driver {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(flatten)]
    rest: Mapping,
}

/// Move `old` into `new` unless `new` is already set, in which case both are
/// left alone and the user is told to sort it out.
fn rename(old: &mut Option<Value>, new: &mut Option<Value>, from: &str, to: &str) {
    if old.is_none() {
        return;
    }
    info!("Renaming {from} to {to}");
    if new.is_some() {
        warn!("WARNING! {to} already set. Please migrate {from} manually");
    } else {
        *new = old.take();
    }
}

fn migrate_falco(falco: &mut Falco) {
    warn!(
        "WARNING! Found that falco configuration is/was enabled. Performing automatic migration of default keys.\nPlease confirm that migrated configuration is correct according to Falco helm chart: {FALCO_CHART}"
    );
    if falco.image.is_some() {
        warn!(
            "Please migrate falco.image manually.\n  - Default for falco.image.repository is now falcosecurity/falco-no-driver\n  - Default for falco.driver.loader.initContainer.image.repository is now falcosecurity/falco-driver-loader"
        );
    }

    let extra = falco.extra.get_or_insert_with(Extra::default);
    rename(
        &mut falco.extra_init_containers,
        &mut extra.init_containers,
        "falco.extraInitContainers",
        "falco.extra.initContainers",
    );
    falco.extra = falco.extra.take().and_then(non_empty);

    if let Some(settings) = falco.falco.as_mut() {
        rename(
            &mut settings.json_output_old,
            &mut settings.json_output,
            "falco.falco.jsonOutput",
            "falco.falco.json_output",
        );
        rename(
            &mut settings.rules_file_old,
            &mut settings.rules_file,
            "falco.falco.rulesFile",
            "falco.falco.rules_file",
        );
    }

    if let Some(mut ebpf) = falco.ebpf.take() {
        if ebpf.enabled == Some(true) {
            info!("Setting falco.driver.kind to `ebpf` as `falco.ebpf.enabled` is set to `true`");
            falco.driver.get_or_insert_with(Driver::default).kind = Some("ebpf".to_string());
            ebpf.enabled = None;
            falco.ebpf = non_empty(ebpf);
        } else {
            falco.ebpf = Some(ebpf);
        }
    }
}

/// Rename Falco keys for the new chart release. Only done when
/// `falco.enabled` is set, to either value.
///
/// # Errors
///
/// Function will return an error if the input is not valid YAML or a known
/// key holds a value of the wrong shape.
pub fn migrate(input: &str) -> Result<String, Error> {
    let mut values: Values = parse(input)?;
    let Some(falco) = values.falco.as_mut().filter(|falco| falco.enabled.is_some()) else {
        return Ok(input.to_string());
    };
    migrate_falco(falco);
    emit(&values)
}

#[cfg(test)]
mod test {
    use super::migrate;
    use crate::test::assert_yaml_eq;

    #[test]
    fn untouched_unless_enabled_is_set() {
        let input = "falco:\n  falco:\n    jsonOutput: true\n";
        assert_eq!(migrate(input).unwrap(), input);
        assert_eq!(migrate("{}").unwrap(), "{}");
    }

    #[test]
    fn keys_are_renamed() {
        let input = r"
falco:
  enabled: false
  extraInitContainers:
    - name: init
  falco:
    jsonOutput: true
    rulesFile:
      - /etc/falco/rules.yaml
    load_plugins: []
  ebpf:
    enabled: true
";
        let expected = r"
falco:
  enabled: false
  extra:
    initContainers:
      - name: init
  falco:
    json_output: true
    rules_file:
      - /etc/falco/rules.yaml
    load_plugins: []
  driver:
    kind: ebpf
";
        assert_yaml_eq(&migrate(input).unwrap(), expected);
    }

    #[test]
    fn new_keys_win() {
        let input = r"
falco:
  enabled: true
  extraInitContainers: [a]
  extra:
    initContainers: [b]
  falco:
    jsonOutput: true
    json_output: false
";
        assert_yaml_eq(&migrate(input).unwrap(), input);
    }

    #[test]
    fn ebpf_settings_are_kept() {
        let input = r"
falco:
  enabled: true
  ebpf:
    enabled: true
    settings:
      hostNetwork: true
  driver:
    loader:
      enabled: false
";
        let expected = r"
falco:
  enabled: true
  ebpf:
    settings:
      hostNetwork: true
  driver:
    kind: ebpf
    loader:
      enabled: false
";
        assert_yaml_eq(&migrate(input).unwrap(), expected);
    }
}
