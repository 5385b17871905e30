//! HTTP transports: OTLP protobuf, Zipkin JSON and Jaeger Thrift.

use bytes::Bytes;
use http::{
    HeaderName, HeaderValue, Uri,
    header::{CONTENT_LENGTH, CONTENT_TYPE},
    uri::PathAndQuery,
};
use http_body_util::combinators::BoxBody;
use hyper::Request;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use metrics::counter;
use tracing::{error, info, warn};

use super::{Backoff, BackoffBehavior, Endpoint};
use crate::common::full;

const OTLP_TRACES_PATH: &str = "/v1/traces";

/// Errors produced by [`Http`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The endpoint URI could not be adjusted.
    #[error("invalid endpoint: {0}")]
    Uri(#[from] http::Error),
    /// A header name is invalid.
    #[error("invalid header name: {0}")]
    HeaderName(#[from] http::header::InvalidHeaderName),
    /// A header value is invalid.
    #[error("invalid header value: {0}")]
    HeaderValue(#[from] http::header::InvalidHeaderValue),
}

/// Body encoding, which fixes the content type and default path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// OTLP `ExportTraceServiceRequest`
    OtlpProtobuf,
    /// Zipkin v2 span list
    ZipkinJson,
    /// Jaeger `Batch`
    JaegerThrift,
}

impl Encoding {
    fn content_type(self) -> &'static str {
        match self {
            Encoding::OtlpProtobuf => "application/x-protobuf",
            Encoding::ZipkinJson => "application/json",
            Encoding::JaegerThrift => "application/x-thrift",
        }
    }
}

/// Resolve the URI batches are posted to. OTLP endpoints given without a
/// path are completed with `/v1/traces`.
pub(crate) fn target_uri(endpoint: &Uri, encoding: Encoding) -> Result<Uri, http::Error> {
    let uri = super::grpc::with_default_scheme(endpoint)?;
    let bare = uri.path_and_query().is_none_or(|p| p.path() == "/");
    if encoding == Encoding::OtlpProtobuf && bare {
        let mut parts = uri.into_parts();
        parts.path_and_query = Some(PathAndQuery::from_static(OTLP_TRACES_PATH));
        return Ok(Uri::from_parts(parts).map_err(http::Error::from)?);
    }
    Ok(uri)
}

/// HTTP transport.
#[derive(Debug)]
pub struct Http {
    client: Client<HttpConnector, BoxBody<Bytes, hyper::Error>>,
    uri: Uri,
    encoding: Encoding,
    headers: Vec<(HeaderName, HeaderValue)>,
    backoff: BackoffBehavior,
}

impl Http {
    /// Create a new [`Http`] transport.
    ///
    /// # Errors
    ///
    /// Function will return an error if the endpoint or headers are invalid.
    pub fn new(endpoint: &Endpoint, encoding: Encoding) -> Result<Self, Error> {
        let mut headers = Vec::with_capacity(endpoint.headers.len());
        for (k, v) in &endpoint.headers {
            headers.push((
                HeaderName::from_bytes(k.as_bytes())?,
                HeaderValue::from_str(v)?,
            ));
        }

        let client = Client::builder(TokioExecutor::new())
            .retry_canceled_requests(false)
            .build_http();

        Ok(Self {
            client,
            uri: target_uri(&endpoint.endpoint, encoding)?,
            encoding,
            headers,
            backoff: endpoint.backoff,
        })
    }

    pub(crate) async fn send(&mut self, body: Bytes, labels: &[(String, String)]) -> bool {
        let body_length = body.len();
        let mut backoff = Backoff::new(self.backoff);
        loop {
            let mut request = Request::builder()
                .method(hyper::Method::POST)
                .uri(&self.uri)
                .header(CONTENT_TYPE, self.encoding.content_type())
                .header(CONTENT_LENGTH, body_length);
            for (k, v) in &self.headers {
                request = request.header(k, v);
            }
            let request = match request.body(full(body.clone())) {
                Ok(req) => req,
                Err(e) => {
                    error!("Failed to build request: {e}");
                    return false;
                }
            };
            counter!("requests_sent", labels).increment(1);

            match self.client.request(request).await {
                Ok(response) => {
                    let status_code = response.status().as_u16();

                    let mut status_labels = Vec::with_capacity(labels.len() + 1);
                    status_labels.extend_from_slice(labels);
                    status_labels.push(("status_code".to_string(), status_code.to_string()));

                    match status_code {
                        200..=299 => {
                            counter!("request_ok", &status_labels).increment(1);
                            return true;
                        }
                        429 | 503 => {
                            info!("Received {status_code} response, will attempt to retry.");
                            if backoff.wait().await.is_none() {
                                info!("Retries exceeded.");
                                counter!("request_failure", &status_labels).increment(1);
                                return false;
                            }
                        }
                        code => {
                            warn!(code = ?code, uri = %self.uri, "export rejected");
                            counter!("request_failure", &status_labels).increment(1);
                            return false;
                        }
                    }
                }
                Err(err) => {
                    warn!(uri = %self.uri, "export failed: {err}");
                    let mut error_labels = Vec::with_capacity(labels.len() + 1);
                    error_labels.extend_from_slice(labels);
                    error_labels.push(("error".to_string(), err.to_string()));
                    counter!("request_failure", &error_labels).increment(1);
                    return false;
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use http::Uri;

    use super::{Encoding, target_uri};

    #[test]
    fn otlp_path_defaults() {
        let uri: Uri = "http://collector:55681".parse().unwrap();
        assert_eq!(
            target_uri(&uri, Encoding::OtlpProtobuf).unwrap().to_string(),
            "http://collector:55681/v1/traces"
        );

        let uri: Uri = "collector:4318".parse().unwrap();
        assert_eq!(
            target_uri(&uri, Encoding::OtlpProtobuf).unwrap().to_string(),
            "http://collector:4318/v1/traces"
        );

        let uri: Uri = "http://collector:4318/custom/traces".parse().unwrap();
        assert_eq!(target_uri(&uri, Encoding::OtlpProtobuf).unwrap(), uri);
    }

    #[test]
    fn other_encodings_keep_path() {
        let uri: Uri = "http://collector:9411/api/v2/spans".parse().unwrap();
        assert_eq!(target_uri(&uri, Encoding::ZipkinJson).unwrap(), uri);
    }
}
