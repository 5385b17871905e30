//! OTLP over gRPC.
//!
//! Batches arrive already encoded as an `ExportTraceServiceRequest`, so the
//! unary call is made with a pass-through codec rather than re-encoding
//! through generated client stubs.

use std::time::Duration;

use bytes::{BufMut, Bytes};
use http::{Uri, uri::PathAndQuery};
use metrics::counter;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceResponse;
use prost::Message;
use tonic::{
    Code, Request, Status,
    codec::{DecodeBuf, Decoder, EncodeBuf, Encoder},
    metadata::{AsciiMetadataKey, AsciiMetadataValue},
    transport::Channel,
};
use tracing::{debug, info, warn};

use super::{Backoff, BackoffBehavior, Endpoint};

const EXPORT_PATH: &str = "/opentelemetry.proto.collector.trace.v1.TraceService/Export";

/// Errors produced by [`Grpc`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// gRPC transport error
    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
    /// The endpoint URI could not be completed with a scheme.
    #[error("invalid gRPC endpoint: {0}")]
    Uri(#[from] http::Error),
    /// A header name is not valid gRPC metadata.
    #[error("invalid metadata key: {0}")]
    MetadataKey(#[from] tonic::metadata::errors::InvalidMetadataKey),
    /// A header value is not valid gRPC metadata.
    #[error("invalid metadata value: {0}")]
    MetadataValue(#[from] tonic::metadata::errors::InvalidMetadataValue),
}

/// Codec for the trace `Export` call. Requests go out as the bytes the OTLP
/// encoder already produced. Responses are decoded so partially rejected
/// batches can be reported.
#[derive(Debug, Clone, Default, Copy)]
struct ExportCodec;

impl tonic::codec::Codec for ExportCodec {
    type Encode = Bytes;
    type Decode = ExportTraceServiceResponse;

    type Encoder = Self;
    type Decoder = Self;

    fn encoder(&mut self) -> Self::Encoder {
        Self
    }

    fn decoder(&mut self) -> Self::Decoder {
        Self
    }
}

impl Encoder for ExportCodec {
    type Item = Bytes;
    type Error = Status;

    fn encode(&mut self, item: Bytes, buf: &mut EncodeBuf<'_>) -> Result<(), Status> {
        buf.put(item);
        Ok(())
    }
}

impl Decoder for ExportCodec {
    type Item = ExportTraceServiceResponse;
    type Error = Status;

    fn decode(&mut self, buf: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Status> {
        ExportTraceServiceResponse::decode(buf)
            .map(Some)
            .map_err(|err| Status::internal(format!("malformed export response: {err}")))
    }
}

/// Spans the collector accepted the request for but did not keep.
fn rejected_spans(response: &ExportTraceServiceResponse) -> u64 {
    response
        .partial_success
        .as_ref()
        .map_or(0, |partial| u64::try_from(partial.rejected_spans).unwrap_or(0))
}

/// Give `uri` an `http` scheme if it has none, so `host:port` endpoints work.
pub(crate) fn with_default_scheme(uri: &Uri) -> Result<Uri, http::Error> {
    if uri.scheme().is_some() {
        return Ok(uri.clone());
    }
    let authority = uri.authority().map_or("", |a| a.as_str());
    Ok(Uri::builder()
        .scheme("http")
        .authority(authority)
        .path_and_query("/")
        .build()?)
}

/// OTLP gRPC transport.
#[derive(Debug)]
pub struct Grpc {
    client: tonic::client::Grpc<Channel>,
    rpc_path: PathAndQuery,
    metadata: Vec<(AsciiMetadataKey, AsciiMetadataValue)>,
    backoff: BackoffBehavior,
}

impl Grpc {
    /// Create a new [`Grpc`] transport. The channel connects lazily and
    /// reconnects on its own.
    ///
    /// # Errors
    ///
    /// Function will return an error if the endpoint or headers are invalid.
    pub fn new(endpoint: &Endpoint) -> Result<Self, Error> {
        let uri = with_default_scheme(&endpoint.endpoint)?;
        let channel = tonic::transport::Endpoint::new(uri)?
            .connect_timeout(Duration::from_secs(1))
            .connect_lazy();

        let mut metadata = Vec::with_capacity(endpoint.headers.len());
        for (k, v) in &endpoint.headers {
            let key = AsciiMetadataKey::from_bytes(k.to_ascii_lowercase().as_bytes())?;
            let value = AsciiMetadataValue::try_from(v.as_str())?;
            metadata.push((key, value));
        }

        debug!("gRPC exporter configured");
        Ok(Self {
            client: tonic::client::Grpc::new(channel),
            rpc_path: PathAndQuery::from_static(EXPORT_PATH),
            metadata,
            backoff: endpoint.backoff,
        })
    }

    /// Send one RPC request
    async fn req(&mut self, body: Bytes) -> Result<ExportTraceServiceResponse, Status> {
        self.client.ready().await.map_err(|e| {
            Status::new(Code::Unavailable, format!("Service was not ready: {e}"))
        })?;
        let mut request = Request::new(body);
        for (key, value) in &self.metadata {
            request.metadata_mut().insert(key.clone(), value.clone());
        }
        let res = self
            .client
            .unary(request, self.rpc_path.clone(), ExportCodec)
            .await?;
        Ok(res.into_inner())
    }

    pub(crate) async fn send(&mut self, body: Bytes, labels: &[(String, String)]) -> bool {
        let mut backoff = Backoff::new(self.backoff);
        loop {
            counter!("requests_sent", labels).increment(1);
            match self.req(body.clone()).await {
                Ok(response) => {
                    counter!("request_ok", labels).increment(1);
                    let rejected = rejected_spans(&response);
                    if rejected > 0 {
                        let message = response
                            .partial_success
                            .map(|partial| partial.error_message)
                            .unwrap_or_default();
                        warn!(rejected, "collector rejected part of the batch: {message}");
                        counter!("spans_rejected", labels).increment(rejected);
                    }
                    return true;
                }
                Err(status)
                    if matches!(status.code(), Code::Unavailable | Code::ResourceExhausted) =>
                {
                    info!("Received {:?}, will attempt to retry.", status.code());
                    if backoff.wait().await.is_none() {
                        warn!("Retries exceeded: {}", status.message());
                        Self::failure(labels, &status);
                        return false;
                    }
                }
                Err(status) => {
                    warn!("export rejected: {status}");
                    Self::failure(labels, &status);
                    return false;
                }
            }
        }
    }

    fn failure(labels: &[(String, String)], status: &Status) {
        let mut error_labels = labels.to_vec();
        error_labels.push(("error".to_string(), format!("{:?}", status.code())));
        counter!("request_failure", &error_labels).increment(1);
    }
}

#[cfg(test)]
mod test {
    use bytes::BytesMut;
    use http::Uri;
    use opentelemetry_proto::tonic::collector::trace::v1::{
        ExportTracePartialSuccess, ExportTraceServiceResponse,
    };
    use prost::Message;

    use super::{rejected_spans, with_default_scheme};

    #[test]
    fn partial_success_counts_rejected_spans() {
        let response = ExportTraceServiceResponse {
            partial_success: Some(ExportTracePartialSuccess {
                rejected_spans: 4,
                error_message: "quota".to_string(),
            }),
        };
        let mut buf = BytesMut::new();
        response.encode(&mut buf).unwrap();
        let decoded = ExportTraceServiceResponse::decode(buf.freeze()).unwrap();
        assert_eq!(rejected_spans(&decoded), 4);
        assert_eq!(rejected_spans(&ExportTraceServiceResponse::default()), 0);
    }

    #[test]
    fn bare_authority_gains_scheme() {
        let uri: Uri = "localhost:55680".parse().unwrap();
        let uri = with_default_scheme(&uri).unwrap();
        assert_eq!(uri.to_string(), "http://localhost:55680/");

        let uri: Uri = "https://collector:4317".parse().unwrap();
        assert_eq!(with_default_scheme(&uri).unwrap(), uri);
    }
}
