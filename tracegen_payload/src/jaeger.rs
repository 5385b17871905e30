//! Jaeger Thrift trace payload.
//!
//! Encodes a `jaeger.thrift` `Batch` with the Thrift binary protocol, the body
//! the Jaeger collector accepts on `/api/traces` as `application/x-thrift`.
//!
//! ```text
//! struct Batch   { 1: Process process, 2: list<Span> spans }
//! struct Process { 1: string serviceName, 2: optional list<Tag> tags }
//! struct Span    { 1: i64 traceIdLow, 2: i64 traceIdHigh, 3: i64 spanId,
//!                  4: i64 parentSpanId, 5: string operationName,
//!                  6: optional list<SpanRef> references, 7: i32 flags,
//!                  8: i64 startTime, 9: i64 duration,
//!                  10: optional list<Tag> tags, 11: optional list<Log> logs }
//! struct SpanRef { 1: SpanRefType refType, 2: i64 traceIdLow,
//!                  3: i64 traceIdHigh, 4: i64 spanId }
//! struct Tag     { 1: string key, 2: TagType vType, 3: optional string vStr,
//!                  4: optional double vDouble, 5: optional bool vBool,
//!                  6: optional i64 vLong }
//! struct Log     { 1: i64 timestamp, 2: list<Tag> fields }
//! ```

use std::io::Write;

use crate::{Error, Resource, Span, SpanKind, Status, Value, trace::KeyValue};

// Thrift binary protocol type identifiers.
const T_STOP: u8 = 0;
const T_BOOL: u8 = 2;
const T_DOUBLE: u8 = 4;
const T_I32: u8 = 8;
const T_I64: u8 = 10;
const T_STRING: u8 = 11;
const T_STRUCT: u8 = 12;
const T_LIST: u8 = 15;

const REF_CHILD_OF: i32 = 0;
const REF_FOLLOWS_FROM: i32 = 1;

const TAG_STRING: i32 = 0;
const TAG_DOUBLE: i32 = 1;
const TAG_BOOL: i32 = 2;
const TAG_LONG: i32 = 3;

const FLAG_SAMPLED: i32 = 1;

/// Jaeger encoder, producing one Thrift `Batch` per call.
#[derive(Debug, Clone, Copy, Default)]
pub struct Jaeger;

/// Minimal Thrift binary protocol writer.
struct Protocol<'a, W> {
    writer: &'a mut W,
}

impl<W> Protocol<'_, W>
where
    W: Write,
{
    fn field(&mut self, ty: u8, id: i16) -> Result<(), Error> {
        self.writer.write_all(&[ty])?;
        self.writer.write_all(&id.to_be_bytes())?;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Error> {
        self.writer.write_all(&[T_STOP])?;
        Ok(())
    }

    fn list(&mut self, elem: u8, len: usize) -> Result<(), Error> {
        let len = i32::try_from(len).unwrap_or(i32::MAX);
        self.writer.write_all(&[elem])?;
        self.writer.write_all(&len.to_be_bytes())?;
        Ok(())
    }

    fn i32(&mut self, id: i16, v: i32) -> Result<(), Error> {
        self.field(T_I32, id)?;
        self.writer.write_all(&v.to_be_bytes())?;
        Ok(())
    }

    fn i64(&mut self, id: i16, v: i64) -> Result<(), Error> {
        self.field(T_I64, id)?;
        self.writer.write_all(&v.to_be_bytes())?;
        Ok(())
    }

    fn double(&mut self, id: i16, v: f64) -> Result<(), Error> {
        self.field(T_DOUBLE, id)?;
        self.writer.write_all(&v.to_bits().to_be_bytes())?;
        Ok(())
    }

    fn bool(&mut self, id: i16, v: bool) -> Result<(), Error> {
        self.field(T_BOOL, id)?;
        self.writer.write_all(&[u8::from(v)])?;
        Ok(())
    }

    fn string(&mut self, id: i16, v: &str) -> Result<(), Error> {
        self.field(T_STRING, id)?;
        let len = i32::try_from(v.len()).unwrap_or(i32::MAX);
        self.writer.write_all(&len.to_be_bytes())?;
        self.writer.write_all(v.as_bytes())?;
        Ok(())
    }

    fn tag(&mut self, key: &str, value: &Value) -> Result<(), Error> {
        self.string(1, key)?;
        match value {
            Value::Str(s) => {
                self.i32(2, TAG_STRING)?;
                self.string(3, s)?;
            }
            Value::Double(d) => {
                self.i32(2, TAG_DOUBLE)?;
                self.double(4, *d)?;
            }
            Value::Bool(b) => {
                self.i32(2, TAG_BOOL)?;
                self.bool(5, *b)?;
            }
            Value::Int(i) => {
                self.i32(2, TAG_LONG)?;
                self.i64(6, *i)?;
            }
        }
        self.stop()
    }

    fn tags(&mut self, id: i16, tags: &[KeyValue]) -> Result<(), Error> {
        self.field(T_LIST, id)?;
        self.list(T_STRUCT, tags.len())?;
        for kv in tags {
            self.tag(&kv.key, &kv.value)?;
        }
        Ok(())
    }

    fn span_ref(&mut self, ty: i32, trace_low: i64, trace_high: i64, span_id: i64) -> Result<(), Error> {
        self.i32(1, ty)?;
        self.i64(2, trace_low)?;
        self.i64(3, trace_high)?;
        self.i64(4, span_id)?;
        self.stop()
    }

    fn span(&mut self, s: &Span) -> Result<(), Error> {
        self.i64(1, s.trace_id.low())?;
        self.i64(2, s.trace_id.high())?;
        self.i64(3, s.span_id.as_i64())?;
        self.i64(4, s.parent_span_id.map_or(0, |p| p.as_i64()))?;
        self.string(5, &s.name)?;

        let refs = usize::from(s.parent_span_id.is_some()) + s.links.len();
        if refs > 0 {
            self.field(T_LIST, 6)?;
            self.list(T_STRUCT, refs)?;
            if let Some(parent) = s.parent_span_id {
                self.span_ref(
                    REF_CHILD_OF,
                    s.trace_id.low(),
                    s.trace_id.high(),
                    parent.as_i64(),
                )?;
            }
            for link in &s.links {
                self.span_ref(
                    REF_FOLLOWS_FROM,
                    link.trace_id.low(),
                    link.trace_id.high(),
                    link.span_id.as_i64(),
                )?;
            }
        }

        self.i32(7, FLAG_SAMPLED)?;
        self.i64(8, micros(s.start_time_unix_nano))?;
        self.i64(
            9,
            micros(s.end_time_unix_nano.saturating_sub(s.start_time_unix_nano)),
        )?;

        let mut tags = s.attributes.clone();
        if let Some(kind) = kind(s.kind) {
            tags.push(KeyValue::new("span.kind", kind));
        }
        if let Status::Error(message) = &s.status {
            tags.push(KeyValue::new("error", true));
            tags.push(KeyValue::new("otel.status_description", message.clone()));
        }
        if !tags.is_empty() {
            self.tags(10, &tags)?;
        }

        if !s.events.is_empty() {
            self.field(T_LIST, 11)?;
            self.list(T_STRUCT, s.events.len())?;
            for event in &s.events {
                self.i64(1, micros(event.time_unix_nano))?;
                let mut fields = vec![KeyValue::new("event", event.name.clone())];
                fields.extend(event.attributes.iter().cloned());
                self.tags(2, &fields)?;
                self.stop()?;
            }
        }

        self.stop()
    }
}

fn micros(nanos: u64) -> i64 {
    i64::try_from(nanos / 1_000).unwrap_or(i64::MAX)
}

fn kind(kind: SpanKind) -> Option<&'static str> {
    match kind {
        SpanKind::Internal => None,
        SpanKind::Server => Some("server"),
        SpanKind::Client => Some("client"),
        SpanKind::Producer => Some("producer"),
        SpanKind::Consumer => Some("consumer"),
    }
}

impl crate::Serialize for Jaeger {
    fn to_bytes<W>(&self, resource: &Resource, spans: &[Span], writer: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        let mut proto = Protocol { writer };

        // Batch.process
        proto.field(T_STRUCT, 1)?;
        proto.string(1, &resource.service_name)?;
        if !resource.attributes.is_empty() {
            proto.tags(2, &resource.attributes)?;
        }
        proto.stop()?;

        // Batch.spans
        proto.field(T_LIST, 2)?;
        proto.list(T_STRUCT, spans.len())?;
        for span in spans {
            proto.span(span)?;
        }

        proto.stop()
    }
}
