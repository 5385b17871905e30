//! The connection scenario.
//!
//! Checks that a set of ingest tokens are accepted by a Zipkin receiver. One
//! worker runs per token, concurrently, each with its own exporter posting to
//! `address/token`, its own service name and its own span budget. Every
//! trace is flushed as soon as it is built so that a rejected token shows up
//! right away.

use http::Uri;
use metrics::counter;
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracegen_payload::{Resource, Span, Tracer};
use tracegen_throttle::Throttle;
use tracing::{info, warn};

use super::{Error, General, chain};
use crate::{
    common::MetricsBuilder,
    exporter::{self, Endpoint, Exporter},
    signals::Shutdown,
};

const TOKEN_HEADER: &str = "auth-token";

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "camelCase")]
#[serde(deny_unknown_fields)]
/// One ingest token under test.
pub struct Token {
    /// The token, appended to the address and sent as `auth-token`
    pub token: String,
    /// Value of `service.name` for this token's spans
    pub service_name: String,
    /// Spans to send with this token
    pub total_spans: u64,
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "camelCase")]
#[serde(deny_unknown_fields)]
/// Configuration of this scenario.
pub struct Config {
    /// Length of every trace chain, root included
    pub spans_per_trace: u64,
    /// Target rate of each worker
    pub spans_per_minute: u64,
    /// Base address of the Zipkin receiver
    pub address: String,
    /// Tokens under test, one worker each
    pub tokens: Vec<Token>,
}

impl Config {
    /// The exporter used for `token`, posting to `address + "/" + token`
    /// exactly as written.
    ///
    /// # Errors
    ///
    /// Function will return an error if the address and token do not form a
    /// valid URI.
    pub fn exporter(&self, token: &Token) -> Result<exporter::Config, Error> {
        let uri: Uri = format!("{}/{}", self.address, token.token).parse()?;
        let mut endpoint = Endpoint::new(uri);
        if !token.token.is_empty() {
            endpoint = endpoint.with_header(TOKEN_HEADER, &token.token);
        }
        Ok(exporter::Config::Zipkin(endpoint))
    }
}

/// Build trace number `trace_number`.
pub(crate) fn build_trace<R>(tracer: &mut Tracer<R>, spans_per_trace: u64, trace_number: u64) -> Vec<Span>
where
    R: Rng,
{
    let mut root = tracer.start_root("parent");
    root.set_attribute("foo", "bar");
    let magic_value = i64::try_from(trace_number % 100).unwrap_or_default();
    chain(tracer, root, spans_per_trace, |span, i| {
        span.set_attribute("tagKey", "tagValue");
        span.set_attribute("countNumber", i64::try_from(i).unwrap_or(i64::MAX));
        span.set_attribute("magicValue", magic_value);
    })
}

#[derive(Debug)]
struct Worker {
    token: Token,
    exporter: exporter::Config,
    spans_per_trace: u64,
    throttle: Throttle,
    tracer: Tracer,
    shutdown: Shutdown,
    id: Option<String>,
    metric_labels: Vec<(String, String)>,
}

impl Worker {
    async fn spin(mut self) -> Result<(), Error> {
        let exporter = Exporter::spawn(
            &self.exporter,
            Resource::new(self.token.service_name.clone()),
            self.id.as_deref(),
        )?;
        let traces = self.token.total_spans / self.spans_per_trace;
        info!(
            service_name = %self.token.service_name,
            endpoint = %self.exporter.endpoint().endpoint,
            traces,
            "connection worker starting"
        );

        let mut total: u64 = 0;
        for i in 0..traces {
            let spans = build_trace(&mut self.tracer, self.spans_per_trace, i);
            exporter.export_all(spans).await?;
            exporter.flush().await?;
            total += self.spans_per_trace;
            counter!("traces_created", &self.metric_labels).increment(1);
            counter!("spans_created", &self.metric_labels).increment(self.spans_per_trace);
            info!(service_name = %self.token.service_name, total);

            tokio::select! {
                () = self.throttle.wait_for(self.spans_per_trace) => {},
                () = self.shutdown.recv() => {
                    info!(service_name = %self.token.service_name, "shutdown signal received");
                    break;
                }
            }

            if i % 100 == 99 {
                let rate = self.throttle.spans_per_minute().unwrap_or_default();
                info!("Created {total} spans, or {rate:.1} spans/minute");
            }
        }

        exporter.shutdown().await?;
        Ok(())
    }
}

#[derive(Debug)]
/// The connection scenario.
pub struct Connection {
    workers: Vec<Worker>,
}

impl Connection {
    /// Create a new [`Connection`] instance
    ///
    /// # Errors
    ///
    /// Creation will fail if trace length or rate are zero, or if any token
    /// does not form a valid collector address.
    pub fn new(
        general: General,
        config: Config,
        seed: [u8; 32],
        shutdown: Shutdown,
    ) -> Result<Self, Error> {
        if config.spans_per_trace == 0 {
            return Err(Error::Zero("spans_per_trace"));
        }
        let mut rng = StdRng::from_seed(seed);
        let mut workers = Vec::with_capacity(config.tokens.len());
        for token in &config.tokens {
            let throttle = Throttle::new_with_config(tracegen_throttle::Config::Paced {
                spans_per_minute: config.spans_per_minute,
            })?;
            let metric_labels = MetricsBuilder::new("scenario", "connection")
                .with_id(general.id.as_deref())
                .with_label("service_name", &token.service_name)
                .build();
            workers.push(Worker {
                token: token.clone(),
                exporter: config.exporter(token)?,
                spans_per_trace: config.spans_per_trace,
                throttle,
                tracer: Tracer::from_seed(rng.random()),
                shutdown: shutdown.clone(),
                id: general.id.clone(),
                metric_labels,
            });
        }
        if workers.is_empty() {
            warn!("connection scenario configured without tokens");
        }
        Ok(Self { workers })
    }

    /// Run every worker to completion or until a shutdown signal is received.
    ///
    /// # Errors
    ///
    /// Function will return the first error a worker signals.
    pub async fn spin(self) -> Result<(), Error> {
        let mut set = JoinSet::new();
        for worker in self.workers {
            set.spawn(worker.spin());
        }
        info!("Waiting for workers to finish");
        while let Some(res) = set.join_next().await {
            res??;
        }
        info!("All workers completed");
        Ok(())
    }
}
