//! Tracegen scenarios
//!
//! A scenario decides the shape of the traces it produces, which exporters
//! carry them and at what rate. Each variant of [`Server`] works in the same
//! basic way: spans are built on the fly, handed to an
//! [`Exporter`](crate::exporter::Exporter) as they end, and the scenario
//! paces itself between traces. All scenarios stop early when the shutdown
//! signal arrives and always flush their exporters before returning.
//!
//! ## Metrics
//!
//! `spans_created`: Spans built by the scenario
//! `traces_created`: Traces built by the scenario

use serde::{Deserialize, Serialize};
use tracegen_payload::{ActiveSpan, Span, SpanContext, Tracer};

use crate::{exporter, signals::Shutdown};

pub mod connection;
pub mod customer;
pub mod follows;
pub mod stress;

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Server`].
pub enum Error {
    /// See [`crate::exporter::Error`] for details.
    #[error(transparent)]
    Exporter(#[from] exporter::Error),
    /// See [`tracegen_throttle::Error`] for details.
    #[error(transparent)]
    Throttle(#[from] tracegen_throttle::Error),
    /// A value that must be positive was zero.
    #[error("{0} must not be zero")]
    Zero(&'static str),
    /// A configured range is empty.
    #[error("invalid range for {0}: {1}")]
    Range(&'static str, &'static str),
    /// A derived collector address is not a valid URI.
    #[error("invalid collector address: {0}")]
    Uri(#[from] http::uri::InvalidUri),
    /// A connection worker failed to complete.
    #[error("worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Default)]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
/// Configurations common to all [`Server`] variants
pub struct General {
    /// The ID assigned to this scenario
    pub id: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
/// Configuration for [`Server`]
pub enum Inner {
    /// See [`stress::Config`] for details.
    Stress(stress::Config),
    /// See [`customer::Config`] for details.
    Customer(customer::Config),
    /// See [`connection::Config`] for details.
    Connection(connection::Config),
    /// See [`follows::Config`] for details.
    Follows(follows::Config),
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
/// Configuration for [`Server`]
pub struct Config {
    /// Common scenario configs
    #[serde(flatten)]
    pub general: General,
    /// The scenario config
    #[serde(flatten)]
    pub inner: Inner,
}

#[derive(Debug)]
/// The scenario server.
///
/// All scenarios supported by tracegen are a variant of this enum. Please see
/// variant documentation for details.
pub enum Server {
    /// See [`stress::Stress`] for details.
    Stress(stress::Stress),
    /// See [`customer::Customer`] for details.
    Customer(customer::Customer),
    /// See [`connection::Connection`] for details.
    Connection(connection::Connection),
    /// See [`follows::Follows`] for details.
    Follows(follows::Follows),
}

impl Server {
    /// Create a new [`Server`]
    ///
    /// This function creates a new [`Server`] instance, deferring to the
    /// underlying scenario. Span identifiers derive from `seed`.
    ///
    /// # Errors
    ///
    /// Function will return an error if the underlying scenario creation
    /// signals error.
    pub fn new(config: Config, seed: [u8; 32], shutdown: Shutdown) -> Result<Self, Error> {
        let srv = match config.inner {
            Inner::Stress(conf) => {
                Self::Stress(stress::Stress::new(config.general, conf, seed, shutdown)?)
            }
            Inner::Customer(conf) => {
                Self::Customer(customer::Customer::new(config.general, conf, seed, shutdown)?)
            }
            Inner::Connection(conf) => Self::Connection(connection::Connection::new(
                config.general,
                conf,
                seed,
                shutdown,
            )?),
            Inner::Follows(conf) => {
                Self::Follows(follows::Follows::new(config.general, conf, seed, shutdown)?)
            }
        };
        Ok(srv)
    }

    /// Run this [`Server`] to completion
    ///
    /// This function runs the scenario to its completion, or until a shutdown
    /// signal is received.
    ///
    /// # Errors
    ///
    /// Function will return an error if the underlying scenario signals error.
    pub async fn run(self) -> Result<(), Error> {
        match self {
            Server::Stress(inner) => inner.spin().await?,
            Server::Customer(inner) => inner.spin().await?,
            Server::Connection(inner) => inner.spin().await?,
            Server::Follows(inner) => inner.spin().await?,
        }
        Ok(())
    }
}

/// One `ancestor-{n}` span of a chain, `n` counting from one.
pub(crate) fn ancestor<R>(tracer: &mut Tracer<R>, parent: SpanContext, n: u64) -> ActiveSpan
where
    R: rand::Rng,
{
    tracer.start_child(format!("ancestor-{n}"), parent)
}

/// Build a trace that is a straight chain: `root` followed by
/// `spans_per_trace - 1` descendants, each the child of the one before. Every
/// span ends before its child starts. `decorate` is called on each descendant
/// with its zero-based position in the chain.
pub(crate) fn chain<R, F>(
    tracer: &mut Tracer<R>,
    root: ActiveSpan,
    spans_per_trace: u64,
    mut decorate: F,
) -> Vec<Span>
where
    R: rand::Rng,
    F: FnMut(&mut ActiveSpan, u64),
{
    let mut spans = Vec::with_capacity(usize::try_from(spans_per_trace).unwrap_or(0));
    let mut current = root;
    for i in 0..spans_per_trace.saturating_sub(1) {
        let ctx = current.context();
        spans.push(current.end());
        current = ancestor(tracer, ctx, i + 1);
        decorate(&mut current, i);
    }
    spans.push(current.end());
    spans
}

#[cfg(test)]
mod test {
    use tracegen_payload::{Tracer, Value};

    use super::{Config, Inner, chain};

    #[test]
    fn chain_links_each_span_to_the_previous() {
        let mut tracer = Tracer::from_seed([9; 32]);
        let root = tracer.start_root("parent");
        let spans = chain(&mut tracer, root, 5, |span, i| {
            span.set_attribute("countNumber", i64::try_from(i).unwrap());
        });

        assert_eq!(spans.len(), 5);
        assert_eq!(spans[0].name, "parent");
        assert!(spans[0].parent_span_id.is_none());
        for (n, pair) in spans.windows(2).enumerate() {
            assert_eq!(pair[1].parent_span_id, Some(pair[0].span_id));
            assert_eq!(pair[1].trace_id, pair[0].trace_id);
            assert_eq!(pair[1].name, format!("ancestor-{}", n + 1));
            assert_eq!(
                pair[1].attributes[0].value,
                Value::Int(i64::try_from(n).unwrap())
            );
        }
    }

    #[test]
    fn single_span_chain_is_just_the_root() {
        let mut tracer = Tracer::from_seed([9; 32]);
        let root = tracer.start_root("parent");
        let spans = chain(&mut tracer, root, 1, |_, _| unreachable!());
        assert_eq!(spans.len(), 1);
    }

    #[test]
    fn config_carries_general() {
        let contents = r#"
id: "follows-a"
follows:
  endpoint: "http://localhost:14268/api/traces"
"#;
        let config: Config = serde_yaml::from_str(contents).unwrap();
        assert_eq!(config.general.id.as_deref(), Some("follows-a"));
        assert!(matches!(config.inner, Inner::Follows(_)));
    }
}
