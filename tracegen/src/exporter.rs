//! Span exporters.
//!
//! An [`Exporter`] owns a background task that receives finished spans,
//! collects them into batches and ships each batch to a collector over one of
//! the [`Config`] transports. A batch is shipped when it is full, when the
//! scheduled delay elapses, when a caller asks for a flush and when the
//! exporter shuts down.
//!
//! ## Metrics
//!
//! `requests_sent`: Total number of export requests sent
//! `request_ok`: Successful export requests
//! `request_failure`: Failed export requests
//! `bytes_written`: Total bytes written
//! `spans_exported`: Spans carried by successful export requests
//! `spans_dropped`: Spans the exporter could not encode or send

use std::time::Duration;

use bytes::Bytes;
use ::http::Uri;
use metrics::counter;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracegen_payload::{Encoder, Jaeger, Otlp, Resource, Span, Zipkin};
use tracing::{debug, error, info};

use crate::common::MetricsBuilder;

pub mod grpc;
pub mod http;

const MAX_RETRY_MILLIS: u64 = 6_400;

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Exporter`].
pub enum Error {
    /// See [`grpc::Error`] for details.
    #[error(transparent)]
    Grpc(#[from] grpc::Error),
    /// See [`http::Error`] for details.
    #[error(transparent)]
    Http(#[from] http::Error),
    /// The exporter task is no longer running.
    #[error("exporter task has stopped")]
    Closed,
    /// The exporter task panicked or was cancelled.
    #[error("exporter task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Batching behavior of an [`Exporter`]
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(deny_unknown_fields)]
#[serde(default)]
pub struct BatchConfig {
    /// Ship a batch as soon as it holds this many spans
    pub max_export_batch_size: usize,
    /// Ship whatever is held after this many milliseconds
    pub scheduled_delay_millis: u64,
    /// Spans buffered between scenario and exporter before senders wait
    pub max_queue_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_export_batch_size: 512,
            scheduled_delay_millis: 5_000,
            max_queue_size: 2_048,
        }
    }
}

/// Backoff behavior when the collector signals it is overloaded
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackoffBehavior {
    /// Retry with exponential backoff
    Obey {
        /// Maximum number of retry attempts
        max_retries: u16,
    },
    /// Drop the batch on the first overload signal
    Ignore,
}

impl BackoffBehavior {
    fn max_retries(self) -> u16 {
        match self {
            Self::Ignore => 0,
            Self::Obey { max_retries } => max_retries,
        }
    }
}

impl Default for BackoffBehavior {
    fn default() -> Self {
        Self::Obey { max_retries: 3 }
    }
}

pub(crate) struct Backoff {
    behavior: BackoffBehavior,
    attempts: u16,
}

impl Backoff {
    pub(crate) fn new(behavior: BackoffBehavior) -> Self {
        Self {
            behavior,
            attempts: 0,
        }
    }

    /// The delay before the next attempt, `None` once retries are exhausted.
    fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.behavior.max_retries() {
            return None;
        }
        // 2^attempts * 100 milliseconds, capped at 6400 milliseconds
        let delay_ms = (100u64 << self.attempts.min(6)).min(MAX_RETRY_MILLIS);
        self.attempts = self.attempts.saturating_add(1);
        Some(Duration::from_millis(delay_ms))
    }

    /// Wait for an amount of time based on previous wait attempts, up to
    /// `max_retries` times.
    ///
    /// Returns Some(()) if the wait was success, None otherwise.
    pub(crate) async fn wait(&mut self) -> Option<()> {
        let delay = self.next_delay()?;
        tokio::time::sleep(delay).await;
        Some(())
    }
}

/// Where and how to reach a collector.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct Endpoint {
    /// The collector URI
    #[serde(with = "http_serde::uri")]
    pub endpoint: Uri,
    /// Headers, or gRPC metadata, added to every export request
    #[serde(default)]
    pub headers: FxHashMap<String, String>,
    /// Batching behavior
    #[serde(default)]
    pub batch: BatchConfig,
    /// Response to collector overload signals
    #[serde(default)]
    pub backoff: BackoffBehavior,
}

impl Endpoint {
    /// An endpoint with default batching, backoff and no headers.
    #[must_use]
    pub fn new(endpoint: Uri) -> Self {
        Self {
            endpoint,
            headers: FxHashMap::default(),
            batch: BatchConfig::default(),
            backoff: BackoffBehavior::default(),
        }
    }

    /// Add a header to every export request.
    #[must_use]
    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.insert(key.to_string(), value.to_string());
        self
    }
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
/// Configuration for [`Exporter`]
pub enum Config {
    /// OTLP over gRPC, unary `TraceService/Export`
    OtlpGrpc(Endpoint),
    /// OTLP protobuf over HTTP
    OtlpHttp(Endpoint),
    /// Zipkin v2 JSON over HTTP
    Zipkin(Endpoint),
    /// Jaeger Thrift over HTTP
    JaegerThriftHttp(Endpoint),
}

impl Config {
    /// Short name of the transport, used in span names and metric labels.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Config::OtlpGrpc(_) => "otlpGrpc",
            Config::OtlpHttp(_) => "otlpHttp",
            Config::Zipkin(_) => "zipkin",
            Config::JaegerThriftHttp(_) => "jaegerThriftHttp",
        }
    }

    /// The collector endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        match self {
            Config::OtlpGrpc(e)
            | Config::OtlpHttp(e)
            | Config::Zipkin(e)
            | Config::JaegerThriftHttp(e) => e,
        }
    }
}

/// The wire transport of an exporter.
#[derive(Debug)]
enum Transport {
    Grpc(grpc::Grpc),
    Http(http::Http),
}

impl Transport {
    /// Deliver one encoded batch. Returns `true` if the collector accepted it.
    async fn send(&mut self, body: Bytes, labels: &[(String, String)]) -> bool {
        match self {
            Transport::Grpc(inner) => inner.send(body, labels).await,
            Transport::Http(inner) => inner.send(body, labels).await,
        }
    }
}

/// What an exporter did over its lifetime.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Totals {
    /// Batches handed to the transport
    pub batches: u64,
    /// Spans the collector accepted
    pub spans_exported: u64,
    /// Spans that could not be encoded or were refused
    pub spans_dropped: u64,
}

enum Command {
    Span(Box<Span>),
    Flush(oneshot::Sender<()>),
}

/// Handle to a running exporter task.
///
/// Dropping every handle, or calling [`Exporter::shutdown`], ships the final
/// batch and stops the task.
#[derive(Debug)]
pub struct Exporter {
    name: &'static str,
    sender: mpsc::Sender<Command>,
    handle: JoinHandle<Totals>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Span(span) => f.debug_tuple("Span").field(&span.span_id).finish(),
            Command::Flush(_) => f.write_str("Flush"),
        }
    }
}

impl Exporter {
    /// Start an exporter for spans produced by `resource`.
    ///
    /// # Errors
    ///
    /// Function will return an error if the endpoint or its headers are not
    /// valid for the configured transport.
    pub fn spawn(config: &Config, resource: Resource, id: Option<&str>) -> Result<Self, Error> {
        let name = config.name();
        let endpoint = config.endpoint();
        let labels = MetricsBuilder::new("exporter", name).with_id(id).build();

        let (encoder, transport) = match config {
            Config::OtlpGrpc(e) => (
                Encoder::Otlp(Otlp::new(resource.service_name.clone())),
                Transport::Grpc(grpc::Grpc::new(e)?),
            ),
            Config::OtlpHttp(e) => (
                Encoder::Otlp(Otlp::new(resource.service_name.clone())),
                Transport::Http(http::Http::new(e, http::Encoding::OtlpProtobuf)?),
            ),
            Config::Zipkin(e) => (
                Encoder::Zipkin(Zipkin),
                Transport::Http(http::Http::new(e, http::Encoding::ZipkinJson)?),
            ),
            Config::JaegerThriftHttp(e) => (
                Encoder::Jaeger(Jaeger),
                Transport::Http(http::Http::new(e, http::Encoding::JaegerThrift)?),
            ),
        };

        let (sender, receiver) = mpsc::channel(endpoint.batch.max_queue_size.max(1));
        let worker = Worker {
            resource,
            encoder,
            transport,
            batch: endpoint.batch,
            labels,
            totals: Totals::default(),
        };
        let handle = tokio::spawn(worker.spin(receiver));
        info!(exporter = name, endpoint = %endpoint.endpoint, "exporter started");

        Ok(Self {
            name,
            sender,
            handle,
        })
    }

    /// Name of the transport this exporter ships over.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Hand a finished span to the exporter. Waits if the queue is full.
    ///
    /// # Errors
    ///
    /// Function will return an error if the exporter task has stopped.
    pub async fn export(&self, span: Span) -> Result<(), Error> {
        self.sender
            .send(Command::Span(Box::new(span)))
            .await
            .map_err(|_| Error::Closed)
    }

    /// Hand every span in `spans` to the exporter.
    ///
    /// # Errors
    ///
    /// Function will return an error if the exporter task has stopped.
    pub async fn export_all(&self, spans: impl IntoIterator<Item = Span>) -> Result<(), Error> {
        for span in spans {
            self.export(span).await?;
        }
        Ok(())
    }

    /// Ship everything handed over so far and wait for the attempt to finish.
    ///
    /// # Errors
    ///
    /// Function will return an error if the exporter task has stopped.
    pub async fn flush(&self) -> Result<(), Error> {
        let (snd, rcv) = oneshot::channel();
        self.sender
            .send(Command::Flush(snd))
            .await
            .map_err(|_| Error::Closed)?;
        rcv.await.map_err(|_| Error::Closed)
    }

    /// Ship the final batch and stop the exporter task.
    ///
    /// # Errors
    ///
    /// Function will return an error if the exporter task failed.
    pub async fn shutdown(self) -> Result<Totals, Error> {
        drop(self.sender);
        let totals = self.handle.await?;
        debug!(
            exporter = self.name,
            batches = totals.batches,
            spans_exported = totals.spans_exported,
            spans_dropped = totals.spans_dropped,
            "exporter stopped"
        );
        Ok(totals)
    }
}

struct Worker {
    resource: Resource,
    encoder: Encoder,
    transport: Transport,
    batch: BatchConfig,
    labels: Vec<(String, String)>,
    totals: Totals,
}

impl Worker {
    async fn spin(mut self, mut receiver: mpsc::Receiver<Command>) -> Totals {
        let max_batch = self.batch.max_export_batch_size.max(1);
        let mut spans: Vec<Span> = Vec::with_capacity(max_batch);
        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.batch.scheduled_delay_millis.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                cmd = receiver.recv() => match cmd {
                    Some(Command::Span(span)) => {
                        spans.push(*span);
                        if spans.len() >= max_batch {
                            self.ship(&mut spans).await;
                        }
                    }
                    Some(Command::Flush(done)) => {
                        self.ship(&mut spans).await;
                        let _ = done.send(());
                    }
                    None => {
                        self.ship(&mut spans).await;
                        break;
                    }
                },
                _ = ticker.tick() => {
                    self.ship(&mut spans).await;
                }
            }
        }
        self.totals
    }

    async fn ship(&mut self, spans: &mut Vec<Span>) {
        if spans.is_empty() {
            return;
        }
        let count = spans.len() as u64;
        self.totals.batches += 1;
        let body = match self.encoder.encode(&self.resource, spans) {
            Ok(body) => body,
            Err(err) => {
                error!("failed to encode {count} spans: {err}");
                counter!("spans_dropped", &self.labels).increment(count);
                self.totals.spans_dropped += count;
                spans.clear();
                return;
            }
        };
        spans.clear();

        let body_length = body.len() as u64;
        if self.transport.send(body, &self.labels).await {
            counter!("bytes_written", &self.labels).increment(body_length);
            counter!("spans_exported", &self.labels).increment(count);
            self.totals.spans_exported += count;
        } else {
            counter!("spans_dropped", &self.labels).increment(count);
            self.totals.spans_dropped += count;
        }
    }
}

#[cfg(test)]
mod test {
    use std::{
        net::SocketAddr,
        sync::{
            Arc,
            atomic::{AtomicU64, Ordering},
        },
        time::Duration,
    };

    use ::http::{Request, Response, StatusCode};
    use bytes::Bytes;
    use http_body_util::{BodyExt, Full};
    use hyper::{body::Incoming, server::conn::http1, service::service_fn};
    use hyper_util::rt::TokioIo;
    use tokio::net::TcpListener;
    use tracegen_payload::{Resource, Span, Tracer};

    use super::{Backoff, BackoffBehavior, BatchConfig, Config, Endpoint, Exporter};

    /// Requests and Zipkin spans received by a local collector.
    #[derive(Debug, Default)]
    struct Received {
        requests: AtomicU64,
        spans: AtomicU64,
    }

    impl Received {
        fn requests(&self) -> u64 {
            self.requests.load(Ordering::SeqCst)
        }

        fn spans(&self) -> u64 {
            self.spans.load(Ordering::SeqCst)
        }

        async fn wait_for_requests(&self, requests: u64) {
            for _ in 0..500 {
                if self.requests() >= requests {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("collector saw {} requests, wanted {requests}", self.requests());
        }
    }

    /// Start a Zipkin collector on a free local port answering every request
    /// with `status`.
    async fn collector(status: StatusCode) -> (SocketAddr, Arc<Received>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Received::default());
        let server_received = Arc::clone(&received);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let received = Arc::clone(&server_received);
                tokio::spawn(async move {
                    let service = service_fn(move |request: Request<Incoming>| {
                        let received = Arc::clone(&received);
                        async move {
                            let body = request.into_body().collect().await?.to_bytes();
                            let spans: Vec<serde_json::Value> =
                                serde_json::from_slice(&body).unwrap_or_default();
                            received.spans.fetch_add(spans.len() as u64, Ordering::SeqCst);
                            received.requests.fetch_add(1, Ordering::SeqCst);
                            let mut response = Response::new(Full::new(Bytes::new()));
                            *response.status_mut() = status;
                            Ok::<_, hyper::Error>(response)
                        }
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });
        (addr, received)
    }

    fn zipkin(addr: SocketAddr, batch: BatchConfig, backoff: BackoffBehavior) -> Config {
        let uri = format!("http://{addr}/api/v2/spans").parse().unwrap();
        Config::Zipkin(Endpoint {
            batch,
            backoff,
            ..Endpoint::new(uri)
        })
    }

    fn spans(count: usize) -> Vec<Span> {
        let mut tracer = Tracer::from_seed([7; 32]);
        (0..count).map(|_| tracer.start_root("batch").end()).collect()
    }

    fn batch(max_export_batch_size: usize, scheduled_delay_millis: u64) -> BatchConfig {
        BatchConfig {
            max_export_batch_size,
            scheduled_delay_millis,
            max_queue_size: 64,
        }
    }

    #[tokio::test]
    async fn full_batches_ship_and_flush_ships_the_rest() {
        let (addr, received) = collector(StatusCode::ACCEPTED).await;
        let config = zipkin(addr, batch(2, 600_000), BackoffBehavior::default());
        let exporter = Exporter::spawn(&config, Resource::new("batching"), None).unwrap();

        exporter.export_all(spans(5)).await.unwrap();
        received.wait_for_requests(2).await;
        assert_eq!(received.requests(), 2);
        assert_eq!(received.spans(), 4);

        exporter.flush().await.unwrap();
        assert_eq!(received.requests(), 3);
        assert_eq!(received.spans(), 5);

        let totals = exporter.shutdown().await.unwrap();
        assert_eq!(totals.batches, 3);
        assert_eq!(totals.spans_exported, 5);
        assert_eq!(totals.spans_dropped, 0);
        assert_eq!(received.requests(), 3);
    }

    #[tokio::test]
    async fn scheduled_delay_ships_partial_batch() {
        let (addr, received) = collector(StatusCode::OK).await;
        let config = zipkin(addr, batch(512, 50), BackoffBehavior::default());
        let exporter = Exporter::spawn(&config, Resource::new("batching"), None).unwrap();

        exporter.export_all(spans(3)).await.unwrap();
        received.wait_for_requests(1).await;
        assert_eq!(received.spans(), 3);

        let totals = exporter.shutdown().await.unwrap();
        assert_eq!(totals.spans_exported, 3);
    }

    #[tokio::test]
    async fn shutdown_drains_partial_batch() {
        let (addr, received) = collector(StatusCode::OK).await;
        let config = zipkin(addr, batch(512, 600_000), BackoffBehavior::default());
        let exporter = Exporter::spawn(&config, Resource::new("batching"), None).unwrap();

        exporter.export_all(spans(3)).await.unwrap();
        assert_eq!(received.requests(), 0);

        let totals = exporter.shutdown().await.unwrap();
        assert_eq!(totals.batches, 1);
        assert_eq!(totals.spans_exported, 3);
        assert_eq!(received.requests(), 1);
        assert_eq!(received.spans(), 3);
    }

    #[tokio::test]
    async fn refused_batch_is_dropped_without_retry() {
        let (addr, received) = collector(StatusCode::TOO_MANY_REQUESTS).await;
        let config = zipkin(addr, batch(512, 600_000), BackoffBehavior::Ignore);
        let exporter = Exporter::spawn(&config, Resource::new("batching"), None).unwrap();

        exporter.export_all(spans(3)).await.unwrap();
        let totals = exporter.shutdown().await.unwrap();
        assert_eq!(totals.spans_exported, 0);
        assert_eq!(totals.spans_dropped, 3);
        assert_eq!(received.requests(), 1);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(BackoffBehavior::Obey { max_retries: 9 });
        let delays: Vec<Duration> = std::iter::from_fn(|| backoff.next_delay()).collect();
        let millis: Vec<u128> = delays.iter().map(Duration::as_millis).collect();
        assert_eq!(
            millis,
            vec![100, 200, 400, 800, 1_600, 3_200, 6_400, 6_400, 6_400]
        );
    }

    #[test]
    fn ignore_never_retries() {
        let mut backoff = Backoff::new(BackoffBehavior::Ignore);
        assert!(backoff.next_delay().is_none());
    }

    #[test]
    fn config_deserializes() {
        let contents = r#"
zipkin:
  endpoint: "http://localhost:9411/api/v2/spans/token"
  headers:
    auth-token: "token"
  batch:
    max_export_batch_size: 100
"#;
        let config: Config = serde_yaml::with::singleton_map_recursive::deserialize(
            serde_yaml::Deserializer::from_str(contents),
        )
        .unwrap();
        assert_eq!(config.name(), "zipkin");
        let endpoint = config.endpoint();
        assert_eq!(endpoint.endpoint.path(), "/api/v2/spans/token");
        assert_eq!(endpoint.headers.get("auth-token").map(String::as_str), Some("token"));
        assert_eq!(endpoint.batch.max_export_batch_size, 100);
        assert_eq!(endpoint.batch.scheduled_delay_millis, 5_000);
    }
}
