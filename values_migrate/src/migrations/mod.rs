//! The individual migrations, each exposing `migrate(&str)`.
//!
//! Migrations that only warn return their input untouched. Warnings are
//! emitted through `tracing` at the warn level so they reach the user
//! without altering the output document.

pub mod config_merge;
pub mod disable_thanos;
pub mod events;
pub mod falco_upgrade;
pub mod fluentd_autoscaling;
pub mod fluentd_logs_configs;
pub mod kube_prometheus_stack_repository;
pub mod kube_state_metrics_collectors;
pub mod logformat;
pub mod metadata_config;
pub mod metrics_server_upgrade;
pub mod remove_load_config_file;
pub mod tailing_sidecar_operator_upgrade;
pub mod tracing_config;
pub mod tracing_objects_changes;
pub mod tracing_replaces;

/// Documentation linked from every manual-migration warning.
pub(crate) const MIGRATION_DOC: &str =
    "https://github.com/SumoLogic/sumologic-kubernetes-collection/blob/main/docs/v3-migration-doc.md";
