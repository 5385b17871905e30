//! Synthetic span trees.
//!
//! A [`Tracer`] hands out [`ActiveSpan`]s, stamped with the wall clock when
//! started and again when ended. Ending an `ActiveSpan` yields a plain
//! [`Span`] ready for one of the encoders in this crate. There is no context
//! propagation: parents and links are passed explicitly as [`SpanContext`].

use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use rand::{Rng, SeedableRng, rngs::StdRng};

/// A 128 bit trace identifier, never zero when produced by a [`Tracer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceId(u128);

impl TraceId {
    /// Wrap a raw identifier.
    #[must_use]
    pub fn new(id: u128) -> Self {
        Self(id)
    }

    /// Big-endian bytes, as OTLP expects them.
    #[must_use]
    pub fn to_bytes(self) -> [u8; 16] {
        self.0.to_be_bytes()
    }

    /// The upper 64 bits, as Jaeger expects them.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn high(self) -> i64 {
        (self.0 >> 64) as u64 as i64
    }

    /// The lower 64 bits, as Jaeger expects them.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn low(self) -> i64 {
        self.0 as u64 as i64
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// A 64 bit span identifier, never zero when produced by a [`Tracer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpanId(u64);

impl SpanId {
    /// Wrap a raw identifier.
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Big-endian bytes, as OTLP expects them.
    #[must_use]
    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// The identifier reinterpreted as signed, as Jaeger expects it.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn as_i64(self) -> i64 {
        self.0 as i64
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// The role a span plays in its trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpanKind {
    /// Internal operation
    #[default]
    Internal,
    /// Server side of a synchronous request
    Server,
    /// Client side of a synchronous request
    Client,
    /// Sender of an asynchronous message
    Producer,
    /// Receiver of an asynchronous message
    Consumer,
}

/// An attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// String
    Str(String),
    /// Boolean
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Floating point
    Double(f64),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Double(d) => write!(f, "{d}"),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

/// A single attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyValue {
    /// Attribute name
    pub key: String,
    /// Attribute value
    pub value: Value,
}

impl KeyValue {
    /// Create a new attribute.
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A timestamped annotation on a span.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Event name
    pub name: String,
    /// When the event happened
    pub time_unix_nano: u64,
    /// Event attributes
    pub attributes: Vec<KeyValue>,
}

/// A FollowsFrom reference to a span that is not this span's parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    /// Trace of the referenced span
    pub trace_id: TraceId,
    /// The referenced span
    pub span_id: SpanId,
}

/// Span outcome.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Status {
    /// No outcome recorded
    #[default]
    Unset,
    /// The operation failed
    Error(String),
}

/// Identity of a span, enough to parent or link to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanContext {
    /// Trace the span belongs to
    pub trace_id: TraceId,
    /// The span itself
    pub span_id: SpanId,
}

/// A finished span.
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    /// Trace the span belongs to
    pub trace_id: TraceId,
    /// This span
    pub span_id: SpanId,
    /// The parent span, `None` for a trace root
    pub parent_span_id: Option<SpanId>,
    /// Operation name
    pub name: String,
    /// Span kind
    pub kind: SpanKind,
    /// Start, nanoseconds since the unix epoch
    pub start_time_unix_nano: u64,
    /// End, nanoseconds since the unix epoch, never before the start
    pub end_time_unix_nano: u64,
    /// Attributes in insertion order, keys unique
    pub attributes: Vec<KeyValue>,
    /// Events in insertion order
    pub events: Vec<Event>,
    /// FollowsFrom references
    pub links: Vec<Link>,
    /// Outcome
    pub status: Status,
}

impl Span {
    /// The identity of this span.
    #[must_use]
    pub fn context(&self) -> SpanContext {
        SpanContext {
            trace_id: self.trace_id,
            span_id: self.span_id,
        }
    }
}

/// The entity producing spans, in practice a named service.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    /// Value of `service.name`
    pub service_name: String,
    /// Additional resource attributes
    pub attributes: Vec<KeyValue>,
}

impl Resource {
    /// A resource identified only by its service name.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            attributes: Vec::new(),
        }
    }
}

/// Nanoseconds since the unix epoch according to the wall clock.
#[must_use]
pub fn now_unix_nano() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
}

/// Source of span identities and start times.
#[derive(Debug)]
pub struct Tracer<R = StdRng> {
    rng: R,
}

impl Tracer<StdRng> {
    /// Create a `Tracer` whose identifiers derive from `seed`.
    #[must_use]
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self::new(StdRng::from_seed(seed))
    }
}

impl<R> Tracer<R>
where
    R: Rng,
{
    /// Create a `Tracer` drawing identifiers from `rng`.
    pub fn new(rng: R) -> Self {
        Self { rng }
    }

    fn trace_id(&mut self) -> TraceId {
        loop {
            let id: u128 = self.rng.random();
            if id != 0 {
                return TraceId(id);
            }
        }
    }

    fn span_id(&mut self) -> SpanId {
        loop {
            let id: u64 = self.rng.random();
            if id != 0 {
                return SpanId(id);
            }
        }
    }

    /// Start the root span of a new trace.
    pub fn start_root(&mut self, name: impl Into<String>) -> ActiveSpan {
        let trace_id = self.trace_id();
        let span_id = self.span_id();
        ActiveSpan::new(trace_id, span_id, None, name.into())
    }

    /// Start a span whose parent is `parent`, in the parent's trace.
    pub fn start_child(&mut self, name: impl Into<String>, parent: SpanContext) -> ActiveSpan {
        let span_id = self.span_id();
        ActiveSpan::new(parent.trace_id, span_id, Some(parent.span_id), name.into())
    }
}

/// A span that has started but not ended.
#[derive(Debug)]
pub struct ActiveSpan {
    span: Span,
}

impl ActiveSpan {
    fn new(trace_id: TraceId, span_id: SpanId, parent: Option<SpanId>, name: String) -> Self {
        let start = now_unix_nano();
        Self {
            span: Span {
                trace_id,
                span_id,
                parent_span_id: parent,
                name,
                kind: SpanKind::Internal,
                start_time_unix_nano: start,
                end_time_unix_nano: start,
                attributes: Vec::new(),
                events: Vec::new(),
                links: Vec::new(),
                status: Status::Unset,
            },
        }
    }

    /// The identity of this span.
    #[must_use]
    pub fn context(&self) -> SpanContext {
        self.span.context()
    }

    /// Set `key` to `value`, replacing any previous value for `key`.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let kv = KeyValue::new(key, value);
        if let Some(existing) = self.span.attributes.iter_mut().find(|a| a.key == kv.key) {
            existing.value = kv.value;
        } else {
            self.span.attributes.push(kv);
        }
    }

    /// Set the kind of this span.
    pub fn set_kind(&mut self, kind: SpanKind) {
        self.span.kind = kind;
    }

    /// Record that this span follows from `other`.
    pub fn add_link(&mut self, other: SpanContext) {
        self.span.links.push(Link {
            trace_id: other.trace_id,
            span_id: other.span_id,
        });
    }

    /// Record an `exception` event and mark the span failed.
    pub fn record_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.span.events.push(Event {
            name: "exception".to_string(),
            time_unix_nano: now_unix_nano(),
            attributes: vec![
                KeyValue::new("exception.type", "error"),
                KeyValue::new("exception.message", message.clone()),
            ],
        });
        self.span.status = Status::Error(message);
    }

    /// End the span now.
    #[must_use]
    pub fn end(self) -> Span {
        self.end_at(now_unix_nano())
    }

    /// End the span at `time_unix_nano`, clamped to no earlier than its start.
    #[must_use]
    pub fn end_at(mut self, time_unix_nano: u64) -> Span {
        self.span.end_time_unix_nano = time_unix_nano.max(self.span.start_time_unix_nano);
        self.span
    }
}
