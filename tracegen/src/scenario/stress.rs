//! The stress scenario.
//!
//! Pushes long chains of spans at a fixed rate through a single exporter. A
//! fraction of traces are "late": their deeper spans stay open while later
//! traces are sent and are only ended, carrying an error, once enough traces
//! have been queued behind them. This exercises collectors that assemble
//! traces over a time window.

use std::collections::VecDeque;

use http::Uri;
use metrics::counter;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracegen_payload::{ActiveSpan, Resource, Span, Tracer};
use tracegen_throttle::Throttle;
use tracing::info;

use super::{Error, General, ancestor};
use crate::{
    common::MetricsBuilder,
    exporter::{self, Endpoint, Exporter},
    signals::Shutdown,
};

fn default_exporter() -> exporter::Config {
    exporter::Config::OtlpGrpc(Endpoint::new(Uri::from_static("http://localhost:55680")))
}

fn default_spans_per_trace() -> u64 {
    100
}

fn default_total_spans() -> u64 {
    10_000_000
}

fn default_late_trace_delay_seconds() -> u64 {
    8
}

fn default_late_trace_frequency() -> u64 {
    20
}

fn default_spans_created_immediately() -> u64 {
    50
}

fn default_service_name() -> String {
    "stress-tester".to_string()
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
/// Configuration of this scenario.
pub struct Config {
    /// Where spans are shipped
    #[serde(default = "default_exporter")]
    pub exporter: exporter::Config,
    /// Target rate
    pub spans_per_minute: u64,
    /// Length of every trace chain, root included
    #[serde(default = "default_spans_per_trace")]
    pub spans_per_trace: u64,
    /// Spans to produce before the scenario ends
    #[serde(default = "default_total_spans")]
    pub total_spans: u64,
    /// How long, in seconds, late traces are held open
    #[serde(default = "default_late_trace_delay_seconds")]
    pub late_trace_delay_seconds: u64,
    /// Every n-th trace is late
    #[serde(default = "default_late_trace_frequency")]
    pub late_trace_frequency: u64,
    /// Spans of each trace, counted from the root, that end as soon as they
    /// are built; the remainder end when the trace is finished
    #[serde(default = "default_spans_created_immediately")]
    pub spans_created_immediately: u64,
    /// Value of `service.name`
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Config {
    /// Late traces held back before the oldest is finished. Derived from how
    /// many traces are sent during the late delay, divided among the late
    /// traces produced in that window.
    #[must_use]
    pub fn late_queue_size(&self) -> u64 {
        let delay_in_spans = self
            .late_trace_delay_seconds
            .saturating_mul(self.spans_per_minute)
            / 60;
        let delay_in_traces = delay_in_spans / self.spans_per_trace.max(1);
        delay_in_traces / self.late_trace_frequency.max(1)
    }
}

/// A trace whose chain has been built. Spans in `ended` are ready to export,
/// spans in `deferred` are still open.
#[derive(Debug)]
pub(crate) struct BuiltTrace {
    pub(crate) ended: Vec<Span>,
    pub(crate) deferred: Vec<ActiveSpan>,
}

impl BuiltTrace {
    fn finish(self) -> impl Iterator<Item = Span> {
        self.deferred.into_iter().map(ActiveSpan::end)
    }
}

/// Build trace number `trace_number`.
pub(crate) fn build_trace<R>(
    tracer: &mut Tracer<R>,
    config: &Config,
    trace_number: u64,
    late: bool,
) -> BuiltTrace
where
    R: Rng,
{
    let mut ended = Vec::new();
    let mut deferred = Vec::new();

    let mut current = tracer.start_root("parent");
    current.set_attribute("late", late);
    let magic_value = i64::try_from(trace_number % 100).unwrap_or_default();

    let mut settle = |span: ActiveSpan, index: u64| {
        if index < config.spans_created_immediately {
            ended.push(span.end());
        } else {
            deferred.push(span);
        }
    };

    for i in 0..config.spans_per_trace.saturating_sub(1) {
        let ctx = current.context();
        settle(current, i);

        current = ancestor(tracer, ctx, i + 1);
        current.set_attribute("tagKey", "tagValue");
        current.set_attribute("countNumber", i64::try_from(i).unwrap_or(i64::MAX));
        current.set_attribute("magicValue", magic_value);
        if trace_number % 11 == 0 {
            current.set_attribute("magicTag", "true");
        }
        current.set_attribute("late", late);
    }
    settle(current, config.spans_per_trace.saturating_sub(1));

    if late {
        for span in &mut deferred {
            span.set_attribute("magicTag", "late");
            span.record_error("some error");
        }
    }

    BuiltTrace { ended, deferred }
}

#[derive(Debug)]
/// The stress scenario.
pub struct Stress {
    config: Config,
    tracer: Tracer,
    throttle: Throttle,
    shutdown: Shutdown,
    id: Option<String>,
    metric_labels: Vec<(String, String)>,
}

impl Stress {
    /// Create a new [`Stress`] instance
    ///
    /// # Errors
    ///
    /// Creation will fail if trace length, late frequency or rate are zero.
    pub fn new(
        general: General,
        config: Config,
        seed: [u8; 32],
        shutdown: Shutdown,
    ) -> Result<Self, Error> {
        if config.spans_per_trace == 0 {
            return Err(Error::Zero("spans_per_trace"));
        }
        if config.late_trace_frequency == 0 {
            return Err(Error::Zero("late_trace_frequency"));
        }
        let throttle = Throttle::new_with_config(tracegen_throttle::Config::Paced {
            spans_per_minute: config.spans_per_minute,
        })?;
        let metric_labels = MetricsBuilder::new("scenario", "stress")
            .with_id(general.id.as_deref())
            .build();

        Ok(Self {
            config,
            tracer: Tracer::from_seed(seed),
            throttle,
            shutdown,
            id: general.id,
            metric_labels,
        })
    }

    /// Run to completion or until a shutdown signal is received.
    ///
    /// # Errors
    ///
    /// Function will return an error if the exporter cannot be created or
    /// stops unexpectedly.
    pub async fn spin(mut self) -> Result<(), Error> {
        let exporter = Exporter::spawn(
            &self.config.exporter,
            Resource::new(self.config.service_name.clone()),
            self.id.as_deref(),
        )?;

        let traces = self.config.total_spans / self.config.spans_per_trace;
        let queue_size = self.config.late_queue_size();
        info!(
            traces,
            late_queue_size = queue_size,
            spans_per_minute = self.config.spans_per_minute,
            "stress scenario starting"
        );

        let mut late_queue: VecDeque<BuiltTrace> = VecDeque::new();
        let mut late_sent: u64 = 0;
        let mut total: u64 = 0;

        for i in 0..traces {
            if self.shutdown.try_recv() {
                info!("shutdown signal received");
                break;
            }

            let late = i % self.config.late_trace_frequency == 0;
            let mut trace = build_trace(&mut self.tracer, &self.config, i, late);
            exporter
                .export_all(std::mem::take(&mut trace.ended))
                .await?;
            if late {
                late_queue.push_back(trace);
            } else {
                exporter.export_all(trace.finish()).await?;
            }

            let queued = late_queue.len() as u64;
            if queued > 0 && (queued >= queue_size || i == traces - 1) {
                if let Some(oldest) = late_queue.pop_front() {
                    exporter.export_all(oldest.finish()).await?;
                    late_sent += 1;
                }
            }

            total += self.config.spans_per_trace;
            counter!("traces_created", &self.metric_labels).increment(1);
            counter!("spans_created", &self.metric_labels).increment(self.config.spans_per_trace);

            tokio::select! {
                () = self.throttle.wait_for(self.config.spans_per_trace) => {},
                () = self.shutdown.recv() => {
                    info!("shutdown signal received");
                    break;
                }
            }

            if i % 100 == 99 {
                let rate = self.throttle.spans_per_minute().unwrap_or_default();
                info!(
                    late_queue = late_queue.len(),
                    late_sent, "created {total} spans at {rate:.1} spans/minute"
                );
            }
        }

        info!("Finishing late spans...");
        for trace in late_queue.drain(..) {
            exporter.export_all(trace.finish()).await?;
        }
        let exported = exporter.shutdown().await?;
        info!(
            total,
            late_sent,
            spans_exported = exported.spans_exported,
            spans_dropped = exported.spans_dropped,
            "stress scenario complete"
        );
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use tracegen_payload::{Status, Tracer, Value};

    use super::{Config, build_trace, default_exporter};

    fn config(spans_per_trace: u64, spans_created_immediately: u64) -> Config {
        Config {
            exporter: default_exporter(),
            spans_per_minute: 6_000,
            spans_per_trace,
            total_spans: 1_000,
            late_trace_delay_seconds: 8,
            late_trace_frequency: 20,
            spans_created_immediately,
            service_name: "stress-tester".to_string(),
        }
    }

    fn attr<'a>(span: &'a tracegen_payload::Span, key: &str) -> Option<&'a Value> {
        span.attributes.iter().find(|kv| kv.key == key).map(|kv| &kv.value)
    }

    #[test]
    fn every_span_is_accounted_for() {
        let mut tracer = Tracer::from_seed([5; 32]);
        let config = config(10, 4);
        let trace = build_trace(&mut tracer, &config, 3, false);
        assert_eq!(trace.ended.len(), 4);
        assert_eq!(trace.deferred.len(), 6);

        let spans: Vec<_> = trace
            .ended
            .into_iter()
            .chain(trace.deferred.into_iter().map(|s| s.end()))
            .collect();
        assert_eq!(spans[0].name, "parent");
        assert_eq!(attr(&spans[0], "late"), Some(&Value::Bool(false)));
        for (i, span) in spans.iter().enumerate().skip(1) {
            assert_eq!(span.name, format!("ancestor-{i}"));
            assert_eq!(span.parent_span_id, Some(spans[i - 1].span_id));
            assert_eq!(
                attr(span, "countNumber"),
                Some(&Value::Int(i64::try_from(i - 1).unwrap()))
            );
            assert_eq!(attr(span, "magicValue"), Some(&Value::Int(3)));
            assert_eq!(attr(span, "tagKey"), Some(&Value::Str("tagValue".into())));
            assert!(attr(span, "magicTag").is_none());
        }
    }

    #[test]
    fn late_traces_carry_errors_on_deferred_spans() {
        let mut tracer = Tracer::from_seed([6; 32]);
        let config = config(5, 2);
        let trace = build_trace(&mut tracer, &config, 22, true);

        for span in &trace.ended {
            assert_eq!(span.status, Status::Unset);
        }
        // 22 % 11 == 0, the immediate child carries the magic tag.
        assert_eq!(
            attr(&trace.ended[1], "magicTag"),
            Some(&Value::Str("true".into()))
        );
        for span in trace.deferred.into_iter().map(|s| s.end()) {
            assert_eq!(attr(&span, "magicTag"), Some(&Value::Str("late".into())));
            assert_eq!(attr(&span, "late"), Some(&Value::Bool(true)));
            assert_eq!(span.events.len(), 1);
            assert!(matches!(span.status, Status::Error(_)));
        }
    }

    #[test]
    fn everything_immediate_when_threshold_exceeds_length() {
        let mut tracer = Tracer::from_seed([8; 32]);
        let trace = build_trace(&mut tracer, &config(3, 50), 1, true);
        assert_eq!(trace.ended.len(), 3);
        assert!(trace.deferred.is_empty());
    }

    #[test]
    fn late_queue_size_follows_rate() {
        // 8s at 60_000 spans/minute is 8_000 spans, 80 traces of 100, of
        // which one in 20 is late.
        let mut config = config(100, 50);
        config.spans_per_minute = 60_000;
        assert_eq!(config.late_queue_size(), 4);

        config.spans_per_minute = 60;
        assert_eq!(config.late_queue_size(), 0);
    }

    #[test]
    fn late_queue_size_saturates() {
        let mut config = config(100, 50);
        config.spans_per_minute = u64::MAX;
        assert_eq!(config.late_queue_size(), u64::MAX / 60 / 100 / 20);
    }

    #[test]
    fn config_defaults() {
        let config: Config = serde_yaml::from_str("spans_per_minute: 1200\n").unwrap();
        assert_eq!(config.spans_per_trace, 100);
        assert_eq!(config.total_spans, 10_000_000);
        assert_eq!(config.late_trace_delay_seconds, 8);
        assert_eq!(config.late_trace_frequency, 20);
        assert_eq!(config.spans_created_immediately, 50);
        assert_eq!(config.exporter.name(), "otlpGrpc");
    }
}
