//! OpenTelemetry OTLP trace payload.
//!
//! [Specification](https://opentelemetry.io/docs/reference/specification/protocol/otlp/)

use std::io::Write;

use opentelemetry_proto::tonic::{
    collector::trace::v1::ExportTraceServiceRequest,
    common::v1::{AnyValue, InstrumentationScope, KeyValue, any_value},
    resource::v1::Resource as OtlpResource,
    trace::v1::{self, span, status},
};
use prost::Message;

use crate::{Error, Resource, Span, SpanKind, Status, Value, trace};

/// OTLP encoder, producing one `ResourceSpans` per batch.
#[derive(Debug, Clone)]
pub struct Otlp {
    scope_name: String,
}

impl Otlp {
    /// Create an encoder whose spans are attributed to the instrumentation
    /// scope `scope_name`.
    pub fn new(scope_name: impl Into<String>) -> Self {
        Self {
            scope_name: scope_name.into(),
        }
    }

    /// Build the export request for `spans`.
    #[must_use]
    pub fn request(&self, resource: &Resource, spans: &[Span]) -> ExportTraceServiceRequest {
        let mut attributes = Vec::with_capacity(resource.attributes.len() + 1);
        attributes.push(str_kv("service.name", &resource.service_name));
        attributes.extend(resource.attributes.iter().map(kv));

        ExportTraceServiceRequest {
            resource_spans: vec![v1::ResourceSpans {
                resource: Some(OtlpResource {
                    attributes,
                    ..Default::default()
                }),
                scope_spans: vec![v1::ScopeSpans {
                    scope: Some(InstrumentationScope {
                        name: self.scope_name.clone(),
                        ..Default::default()
                    }),
                    spans: spans.iter().map(otlp_span).collect(),
                    schema_url: String::new(),
                }],
                schema_url: String::new(),
            }],
        }
    }
}

impl crate::Serialize for Otlp {
    fn to_bytes<W>(&self, resource: &Resource, spans: &[Span], writer: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        let request = self.request(resource, spans);
        let mut buf = Vec::with_capacity(request.encoded_len());
        request.encode(&mut buf)?;
        writer.write_all(&buf)?;
        Ok(())
    }
}

fn str_kv(key: &str, value: &str) -> KeyValue {
    KeyValue {
        key: key.into(),
        value: Some(AnyValue {
            value: Some(any_value::Value::StringValue(value.to_string())),
        }),
    }
}

fn kv(attr: &trace::KeyValue) -> KeyValue {
    let value = match &attr.value {
        Value::Str(s) => any_value::Value::StringValue(s.clone()),
        Value::Bool(b) => any_value::Value::BoolValue(*b),
        Value::Int(i) => any_value::Value::IntValue(*i),
        Value::Double(d) => any_value::Value::DoubleValue(*d),
    };
    KeyValue {
        key: attr.key.clone(),
        value: Some(AnyValue { value: Some(value) }),
    }
}

fn kind(kind: SpanKind) -> span::SpanKind {
    match kind {
        SpanKind::Internal => span::SpanKind::Internal,
        SpanKind::Server => span::SpanKind::Server,
        SpanKind::Client => span::SpanKind::Client,
        SpanKind::Producer => span::SpanKind::Producer,
        SpanKind::Consumer => span::SpanKind::Consumer,
    }
}

fn otlp_span(s: &Span) -> v1::Span {
    v1::Span {
        trace_id: s.trace_id.to_bytes().to_vec(),
        span_id: s.span_id.to_bytes().to_vec(),
        parent_span_id: s
            .parent_span_id
            .map_or(vec![], |p| p.to_bytes().to_vec()),
        name: s.name.clone(),
        kind: kind(s.kind) as i32,
        start_time_unix_nano: s.start_time_unix_nano,
        end_time_unix_nano: s.end_time_unix_nano,
        attributes: s.attributes.iter().map(kv).collect(),
        events: s
            .events
            .iter()
            .map(|e| span::Event {
                time_unix_nano: e.time_unix_nano,
                name: e.name.clone(),
                attributes: e.attributes.iter().map(kv).collect(),
                dropped_attributes_count: 0,
            })
            .collect(),
        links: s
            .links
            .iter()
            .map(|l| span::Link {
                trace_id: l.trace_id.to_bytes().to_vec(),
                span_id: l.span_id.to_bytes().to_vec(),
                ..Default::default()
            })
            .collect(),
        status: match &s.status {
            Status::Unset => None,
            Status::Error(message) => Some(v1::Status {
                message: message.clone(),
                code: status::StatusCode::Error as i32,
            }),
        },
        ..Default::default()
    }
}

#[cfg(test)]
mod test {
    use opentelemetry_proto::tonic::{
        collector::trace::v1::ExportTraceServiceRequest, common::v1::any_value,
    };
    use prost::Message;

    use crate::{Otlp, Resource, Serialize, Tracer};

    #[test]
    fn every_span_is_encoded() {
        let mut tracer = Tracer::from_seed([3; 32]);
        let root = tracer.start_root("parent");
        let mut child = tracer.start_child("ancestor-1", root.context());
        child.set_attribute("countNumber", 0_i64);
        child.add_link(root.context());
        child.record_error("some error");
        let spans = vec![root.end(), child.end()];

        let mut bytes = Vec::new();
        Otlp::new("stress-test-tracer")
            .to_bytes(&Resource::new("stress-tester"), &spans, &mut bytes)
            .unwrap();
        let request = ExportTraceServiceRequest::decode(bytes.as_slice()).unwrap();

        assert_eq!(request.resource_spans.len(), 1);
        let resource_spans = &request.resource_spans[0];
        let service = &resource_spans.resource.as_ref().unwrap().attributes[0];
        assert_eq!(service.key, "service.name");
        assert_eq!(
            service.value.as_ref().unwrap().value,
            Some(any_value::Value::StringValue("stress-tester".to_string()))
        );

        let scope_spans = &resource_spans.scope_spans[0];
        assert_eq!(scope_spans.scope.as_ref().unwrap().name, "stress-test-tracer");
        assert_eq!(scope_spans.spans.len(), 2);

        let (root, child) = (&scope_spans.spans[0], &scope_spans.spans[1]);
        assert!(root.parent_span_id.is_empty());
        assert_eq!(child.parent_span_id, root.span_id);
        assert_eq!(child.trace_id, root.trace_id);
        assert_eq!(child.links.len(), 1);
        assert_eq!(child.events[0].name, "exception");
        assert_eq!(child.status.as_ref().unwrap().code, 2);
    }
}
