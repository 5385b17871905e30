//! Zipkin v2 JSON trace payload.
//!
//! [Specification](https://zipkin.io/zipkin-api/#/default/post_spans)

use std::{collections::BTreeMap, io::Write};

use serde::Serialize;

use crate::{Error, Resource, Span, SpanKind, Status};

/// Zipkin encoder, producing a JSON array of v2 spans.
#[derive(Debug, Clone, Copy, Default)]
pub struct Zipkin;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ZipkinSpan<'a> {
    trace_id: String,
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_id: Option<String>,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<&'static str>,
    /// Microseconds since the unix epoch
    timestamp: u64,
    /// Microseconds, at least one
    duration: u64,
    local_endpoint: Endpoint<'a>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    tags: BTreeMap<&'a str, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    annotations: Vec<Annotation<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Endpoint<'a> {
    service_name: &'a str,
}

#[derive(Serialize)]
struct Annotation<'a> {
    timestamp: u64,
    value: &'a str,
}

fn kind(kind: SpanKind) -> Option<&'static str> {
    match kind {
        SpanKind::Internal => None,
        SpanKind::Server => Some("SERVER"),
        SpanKind::Client => Some("CLIENT"),
        SpanKind::Producer => Some("PRODUCER"),
        SpanKind::Consumer => Some("CONSUMER"),
    }
}

fn zipkin_span<'a>(resource: &'a Resource, s: &'a Span) -> ZipkinSpan<'a> {
    let mut tags: BTreeMap<&str, String> = resource
        .attributes
        .iter()
        .chain(s.attributes.iter())
        .map(|kv| (kv.key.as_str(), kv.value.to_string()))
        .collect();
    if let Status::Error(message) = &s.status {
        tags.insert("otel.status_code", "ERROR".to_string());
        tags.insert("error", message.clone());
    }

    ZipkinSpan {
        trace_id: s.trace_id.to_string(),
        id: s.span_id.to_string(),
        parent_id: s.parent_span_id.map(|p| p.to_string()),
        name: &s.name,
        kind: kind(s.kind),
        timestamp: s.start_time_unix_nano / 1_000,
        duration: (s.end_time_unix_nano.saturating_sub(s.start_time_unix_nano) / 1_000).max(1),
        local_endpoint: Endpoint {
            service_name: &resource.service_name,
        },
        tags,
        annotations: s
            .events
            .iter()
            .map(|e| Annotation {
                timestamp: e.time_unix_nano / 1_000,
                value: &e.name,
            })
            .collect(),
    }
}

impl crate::Serialize for Zipkin {
    fn to_bytes<W>(&self, resource: &Resource, spans: &[Span], writer: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        // Links have no Zipkin counterpart and are not carried.
        let spans: Vec<ZipkinSpan<'_>> = spans.iter().map(|s| zipkin_span(resource, s)).collect();
        serde_json::to_writer(writer, &spans)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use crate::{Resource, Serialize, SpanKind, Tracer, Zipkin};

    #[test]
    fn spans_render_as_v2_json() {
        let mut tracer = Tracer::from_seed([4; 32]);
        let mut root = tracer.start_root("parent");
        root.set_attribute("foo", "bar");
        root.set_kind(SpanKind::Server);
        let root_ctx = root.context();
        let root = root.end_at(0);
        let mut child = tracer.start_child("ancestor-1", root_ctx);
        child.set_attribute("countNumber", 1_i64);
        child.record_error("boom");
        let child = child.end();

        let mut bytes = Vec::new();
        Zipkin
            .to_bytes(&Resource::new("connection-tester"), &[root, child], &mut bytes)
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let spans = json.as_array().unwrap();
        assert_eq!(spans.len(), 2);

        let root = &spans[0];
        assert_eq!(root["name"], "parent");
        assert_eq!(root["kind"], "SERVER");
        assert_eq!(root["tags"]["foo"], "bar");
        assert_eq!(root["localEndpoint"]["serviceName"], "connection-tester");
        assert_eq!(root["traceId"].as_str().unwrap().len(), 32);
        assert!(root.get("parentId").is_none());
        assert!(root["duration"].as_u64().unwrap() >= 1);

        let child = &spans[1];
        assert_eq!(child["parentId"], root["id"]);
        assert_eq!(child["tags"]["countNumber"], "1");
        assert_eq!(child["tags"]["error"], "boom");
        assert_eq!(child["annotations"][0]["value"], "exception");
        assert!(child.get("kind").is_none());
    }
}
