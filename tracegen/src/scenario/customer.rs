//! The customer scenario.
//!
//! Sends the same small set of traces through every supported exporter, one
//! exporter after another, so that a collector's receivers can be checked
//! side by side. Spans live for a random while before they end. When done the
//! scenario logs how many traces and spans the backend should have received.

use std::time::Duration;

use http::Uri;
use metrics::counter;
use rand::{SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use tracegen_payload::{Resource, Tracer};
use tracing::info;

use super::{Error, General, ancestor};
use crate::{
    common::{ConfRange, MetricsBuilder},
    exporter::{self, Endpoint, Exporter},
    signals::Shutdown,
};

fn default_collector_hostname() -> String {
    "collection-sumologic-otelcol.sumologic".to_string()
}

fn default_spans_per_trace() -> u64 {
    10
}

fn default_total_traces() -> u64 {
    1
}

fn default_span_delay_millis() -> ConfRange<u64> {
    ConfRange::Inclusive { min: 10, max: 1000 }
}

fn default_service_name() -> String {
    "customer-trace-test-service".to_string()
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
/// Configuration of this scenario.
pub struct Config {
    /// Host running the collector, used to derive the default exporters
    #[serde(default = "default_collector_hostname")]
    pub collector_hostname: String,
    /// Length of every trace chain, root included
    #[serde(default = "default_spans_per_trace")]
    pub spans_per_trace: u64,
    /// Traces sent through each exporter
    #[serde(default = "default_total_traces")]
    pub total_traces: u64,
    /// Exporters to run through, in order. When absent one exporter per
    /// supported transport is pointed at `collector_hostname`.
    #[serde(default)]
    pub exporters: Option<Vec<exporter::Config>>,
    /// How long each span lives, in milliseconds
    #[serde(default = "default_span_delay_millis")]
    pub span_delay_millis: ConfRange<u64>,
    /// Value of `service.name`
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Config {
    /// The exporters this scenario runs through.
    ///
    /// # Errors
    ///
    /// Function will return an error if `collector_hostname` does not form a
    /// valid URI.
    pub fn exporters(&self) -> Result<Vec<exporter::Config>, Error> {
        if let Some(exporters) = &self.exporters {
            return Ok(exporters.clone());
        }
        let host = &self.collector_hostname;
        let endpoint = |s: String| -> Result<Endpoint, Error> {
            Ok(Endpoint::new(s.parse::<Uri>()?))
        };
        Ok(vec![
            exporter::Config::OtlpHttp(endpoint(format!("http://{host}:55681"))?),
            exporter::Config::OtlpGrpc(endpoint(format!("http://{host}:4317"))?),
            exporter::Config::Zipkin(endpoint(format!("http://{host}:9411/api/v2/spans"))?),
            exporter::Config::JaegerThriftHttp(endpoint(format!(
                "http://{host}:14268/api/traces"
            ))?),
        ])
    }
}

/// What the backend should have received once the scenario completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expected {
    /// Traces across all exporters
    pub traces: u64,
    /// Spans sharing one root-span name, that is sent through one exporter
    pub spans_per_exporter: u64,
    /// Spans across all exporters
    pub spans: u64,
}

impl Expected {
    /// Totals for `exporters` exporters each sending `total_traces` traces of
    /// `spans_per_trace` spans.
    #[must_use]
    pub fn new(exporters: u64, total_traces: u64, spans_per_trace: u64) -> Self {
        let traces = exporters * total_traces;
        Self {
            traces,
            spans_per_exporter: total_traces * spans_per_trace,
            spans: traces * spans_per_trace,
        }
    }
}

#[derive(Debug)]
/// The customer scenario.
pub struct Customer {
    config: Config,
    exporters: Vec<exporter::Config>,
    tracer: Tracer,
    rng: SmallRng,
    shutdown: Shutdown,
    id: Option<String>,
    metric_labels: Vec<(String, String)>,
}

impl Customer {
    /// Create a new [`Customer`] instance
    ///
    /// # Errors
    ///
    /// Creation will fail if the span delay range is empty or the default
    /// exporters cannot be derived.
    pub fn new(
        general: General,
        config: Config,
        seed: [u8; 32],
        shutdown: Shutdown,
    ) -> Result<Self, Error> {
        config
            .span_delay_millis
            .check()
            .map_err(|reason| Error::Range("span_delay_millis", reason))?;
        let exporters = config.exporters()?;
        let metric_labels = MetricsBuilder::new("scenario", "customer")
            .with_id(general.id.as_deref())
            .build();

        Ok(Self {
            config,
            exporters,
            tracer: Tracer::from_seed(seed),
            rng: SmallRng::from_seed(seed),
            shutdown,
            id: general.id,
            metric_labels,
        })
    }

    /// Wait out a span's lifetime. Returns `false` if shutdown arrived first.
    async fn linger(&mut self) -> bool {
        let delay = Duration::from_millis(self.config.span_delay_millis.sample(&mut self.rng));
        tokio::select! {
            () = tokio::time::sleep(delay) => true,
            () = self.shutdown.recv() => false,
        }
    }

    /// Run to completion or until a shutdown signal is received.
    ///
    /// # Errors
    ///
    /// Function will return an error if an exporter cannot be created or
    /// stops unexpectedly.
    pub async fn spin(mut self) -> Result<(), Error> {
        let exporters = std::mem::take(&mut self.exporters);
        let exporter_count = exporters.len() as u64;

        'exporters: for config in &exporters {
            let name = config.name();
            info!("*******************************");
            info!("Sending traces thru {name} exporter");
            info!(
                collector_hostname = %self.config.collector_hostname,
                total_traces = self.config.total_traces,
                spans_per_trace = self.config.spans_per_trace
            );
            let exporter = Exporter::spawn(
                config,
                Resource::new(self.config.service_name.clone()),
                self.id.as_deref(),
            )?;

            for _ in 0..self.config.total_traces {
                let root = self.tracer.start_root(format!("root-span-{name}"));
                let mut ctx = root.context();
                let lived = self.linger().await;
                exporter.export(root.end()).await?;
                if !lived {
                    exporter.shutdown().await?;
                    break 'exporters;
                }

                for n in 1..self.config.spans_per_trace {
                    let mut span = ancestor(&mut self.tracer, ctx, n);
                    span.set_attribute("countNumber", i64::try_from(n).unwrap_or(i64::MAX));
                    ctx = span.context();
                    let lived = self.linger().await;
                    exporter.export(span.end()).await?;
                    if !lived {
                        exporter.shutdown().await?;
                        break 'exporters;
                    }
                }

                counter!("traces_created", &self.metric_labels).increment(1);
                counter!("spans_created", &self.metric_labels)
                    .increment(self.config.spans_per_trace);
            }
            exporter.shutdown().await?;
        }

        let expected = Expected::new(
            exporter_count,
            self.config.total_traces,
            self.config.spans_per_trace,
        );
        info!("*******************************");
        info!("Expected number of all traces: {}", expected.traces);
        info!(
            "Expected number of spans in single trace: {}",
            expected.spans_per_exporter
        );
        info!("Expected number of spans for all traces: {}", expected.spans);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::{Config, Expected};
    use crate::common::ConfRange;

    #[test]
    fn default_exporters_follow_hostname() {
        let config: Config = serde_yaml::from_str("collector_hostname: otelcol\n").unwrap();
        let exporters = config.exporters().unwrap();
        let names: Vec<_> = exporters.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["otlpHttp", "otlpGrpc", "zipkin", "jaegerThriftHttp"]);
        let uris: Vec<_> = exporters
            .iter()
            .map(|e| e.endpoint().endpoint.to_string())
            .collect();
        assert_eq!(
            uris,
            vec![
                "http://otelcol:55681/",
                "http://otelcol:4317/",
                "http://otelcol:9411/api/v2/spans",
                "http://otelcol:14268/api/traces",
            ]
        );
    }

    #[test]
    fn defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.collector_hostname, "collection-sumologic-otelcol.sumologic");
        assert_eq!(config.spans_per_trace, 10);
        assert_eq!(config.total_traces, 1);
        assert_eq!(
            config.span_delay_millis,
            ConfRange::Inclusive { min: 10, max: 1000 }
        );
    }

    #[test]
    fn explicit_exporters_win() {
        let contents = r#"
exporters:
  - zipkin:
      endpoint: "http://localhost:9411/api/v2/spans"
"#;
        let config: Config = serde_yaml::with::singleton_map_recursive::deserialize(
            serde_yaml::Deserializer::from_str(contents),
        )
        .unwrap();
        assert_eq!(config.exporters().unwrap().len(), 1);
    }

    #[test]
    fn expected_totals() {
        let expected = Expected::new(4, 3, 10);
        assert_eq!(expected.traces, 12);
        assert_eq!(expected.spans_per_exporter, 30);
        assert_eq!(expected.spans, 120);
    }
}
