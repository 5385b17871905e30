//! This module controls configuration parsing from the end user, providing a
//! convenience mechanism for the rest of the program. Crashes are most likely
//! to originate from this code, intentionally.
use std::{fs, net::SocketAddr, path::Path};

use rustc_hash::{FxHashMap, FxHashSet};
use serde::Deserialize;

use crate::scenario;

/// Errors produced by [`Config`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error for a serde [`serde_yaml`].
    #[error("Failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    /// Error for IO operations when reading the config file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// Error for duplicate IDs in scenarios
    #[error("Duplicate scenario ID found: {0}")]
    DuplicateScenarioId(String),
}

/// Main configuration struct for this program
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The method by which to express telemetry
    pub telemetry: Option<Telemetry>,
    /// Seed for every scenario. When absent a random seed is drawn at start.
    pub seed: Option<[u8; 32]>,
    /// The scenarios to run, concurrently
    #[serde(default)]
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    pub scenarios: Vec<scenario::Config>,
}

#[derive(Debug, Deserialize, PartialEq, Eq, Clone)]
#[serde(untagged)]
/// Defines the manner of tracegen's telemetry.
pub enum Telemetry {
    /// In prometheus mode tracegen will emit its internal telemetry for
    /// scraping at a prometheus poll endpoint.
    Prometheus {
        /// Address and port for prometheus exporter
        addr: SocketAddr,
        /// Additional labels to include in every metric
        #[serde(default)]
        global_labels: FxHashMap<String, String>,
    },
    /// In log mode tracegen installs no metrics recorder and reports progress
    /// only through its log.
    Log {
        /// Additional labels to include in every metric, unused in this mode
        #[serde(default)]
        global_labels: FxHashMap<String, String>,
    },
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::Log {
            global_labels: FxHashMap::default(),
        }
    }
}

impl Config {
    /// Parse a configuration from YAML `contents`.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid or scenario IDs are duplicated.
    pub fn parse(contents: &str) -> Result<Self, Error> {
        let config: Config = serde_yaml::from_str(contents)?;
        check_duplicate_scenario_ids(&config.scenarios)?;
        Ok(config)
    }
}

/// Check for duplicate IDs in scenario configs
fn check_duplicate_scenario_ids(scenarios: &[scenario::Config]) -> Result<(), Error> {
    let mut seen_ids = FxHashSet::default();
    for scenario_config in scenarios {
        if let Some(ref id) = scenario_config.general.id
            && !seen_ids.insert(id.clone())
        {
            return Err(Error::DuplicateScenarioId(id.clone()));
        }
    }
    Ok(())
}

/// Load configuration from the file at `path`
///
/// # Errors
///
/// Returns an error if the file cannot be read or its contents are not a
/// valid configuration.
pub fn load_config_from_path(path: &Path) -> Result<Config, Error> {
    let contents = fs::read_to_string(path)?;
    Config::parse(&contents)
}
