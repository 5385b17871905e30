//! The tracegen payloads
//!
//! This library builds synthetic span trees and serializes batches of finished
//! spans into the wire formats tracegen exports: OTLP protobuf, Zipkin v2
//! JSON and Jaeger Thrift.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

use std::io::{self, Write};

use bytes::{BufMut, Bytes, BytesMut};

pub use jaeger::Jaeger;
pub use otlp::Otlp;
pub use trace::{
    ActiveSpan, Event, KeyValue, Link, Resource, Span, SpanContext, SpanId, SpanKind, Status,
    TraceId, Tracer, Value,
};
pub use zipkin::Zipkin;

pub mod jaeger;
pub mod otlp;
pub mod trace;
pub mod zipkin;

/// Errors related to serialization
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Json payload could not be encoded
    #[error("Json payload could not be encoded: {0}")]
    Json(#[from] serde_json::Error),
    /// IO operation failed
    #[error("IO operation failed: {0}")]
    Io(#[from] io::Error),
    /// See [`prost::EncodeError`]
    #[error(transparent)]
    ProstEncode(#[from] prost::EncodeError),
}

/// To serialize a batch of finished spans into bytes
pub trait Serialize {
    /// Write the encoding of `spans`, all produced by `resource`, into
    /// `writer`.
    ///
    /// # Errors
    ///
    /// The errors that result come from serialization crackups or a failing
    /// writer.
    fn to_bytes<W>(&self, resource: &Resource, spans: &[Span], writer: &mut W) -> Result<(), Error>
    where
        W: Write;
}

/// The wire formats a batch of spans can be encoded into
#[derive(Debug, Clone)]
pub enum Encoder {
    /// OTLP protobuf, an `ExportTraceServiceRequest`
    Otlp(Otlp),
    /// Zipkin v2 JSON span list
    Zipkin(Zipkin),
    /// Jaeger Thrift binary `Batch`
    Jaeger(Jaeger),
}

impl Encoder {
    /// Encode `spans` into a freshly allocated buffer.
    ///
    /// # Errors
    ///
    /// See [`Serialize::to_bytes`].
    pub fn encode(&self, resource: &Resource, spans: &[Span]) -> Result<Bytes, Error> {
        let mut writer = BytesMut::with_capacity(spans.len() * 256).writer();
        self.to_bytes(resource, spans, &mut writer)?;
        Ok(writer.into_inner().freeze())
    }
}

impl Serialize for Encoder {
    fn to_bytes<W>(&self, resource: &Resource, spans: &[Span], writer: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        match self {
            Encoder::Otlp(ser) => ser.to_bytes(resource, spans, writer),
            Encoder::Zipkin(ser) => ser.to_bytes(resource, spans, writer),
            Encoder::Jaeger(ser) => ser.to_bytes(resource, spans, writer),
        }
    }
}
