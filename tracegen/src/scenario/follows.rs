//! The follows scenario.
//!
//! Builds a single trace spread over two services, `parent_service` and
//! `child_service`, where some spans both descend from and follow from an
//! earlier span. Both services ship over Jaeger Thrift. The trace looks like
//! this:
//!
//! ```text
//! root-span            parent_service, server
//! └ child1             parent_service
//!   └ child2           child_service, follows child1
//!     ├ child3         child_service
//!     ├ child3a        child_service
//!     ├ child3b        child_service
//!     └ child4         parent_service, follows child2
//!       └ child5       parent_service
//! ```
//!
//! Every child is named `child-operation`, is of kind client and lives for
//! about a tenth of a second.

use std::time::Duration;

use http::Uri;
use metrics::counter;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracegen_payload::{ActiveSpan, Resource, Span, SpanContext, SpanKind, Tracer};
use tracing::info;

use super::{Error, General};
use crate::{
    common::MetricsBuilder,
    exporter::{self, Endpoint, Exporter},
    signals::Shutdown,
};

const PARENT_SERVICE: &str = "parent_service";
const CHILD_SERVICE: &str = "child_service";

fn default_endpoint() -> Uri {
    Uri::from_static("http://localhost:14268/api/traces")
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
/// Configuration of this scenario.
pub struct Config {
    /// The Jaeger collector both services report to
    #[serde(with = "http_serde::uri", default = "default_endpoint")]
    pub endpoint: Uri,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
        }
    }
}

/// The service a span is reported by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Service {
    Parent,
    Child,
}

/// Pauses taken while the tree is built.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Timing {
    /// After the root ends
    pub(crate) after_root: Duration,
    /// Lifetime of each child
    pub(crate) child: Duration,
    /// Between siblings
    pub(crate) gap: Duration,
    /// Before child4 starts
    pub(crate) before_child4: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            after_root: Duration::from_millis(50),
            child: Duration::from_millis(100),
            gap: Duration::from_millis(5),
            before_child4: Duration::from_millis(10),
        }
    }
}

/// Start a `child-operation` span under `parent`, optionally following
/// `follows`, and let it live for `timing.child`.
async fn child_operation<R>(
    tracer: &mut Tracer<R>,
    parent: SpanContext,
    follows: Option<SpanContext>,
    timing: Timing,
) -> ActiveSpan
where
    R: Rng,
{
    let mut span = tracer.start_child("child-operation", parent);
    if let Some(follows) = follows {
        span.add_link(follows);
    }
    span.set_kind(SpanKind::Client);
    tokio::time::sleep(timing.child).await;
    span
}

/// Build the tree, in the order spans end.
pub(crate) async fn build_tree<R>(tracer: &mut Tracer<R>, timing: Timing) -> Vec<(Service, Span)>
where
    R: Rng,
{
    let mut spans = Vec::with_capacity(8);

    let mut root = tracer.start_root("root-span");
    root.set_kind(SpanKind::Server);
    let root_ctx = root.context();
    spans.push((Service::Parent, root.end()));
    tokio::time::sleep(timing.after_root).await;

    let child1 = child_operation(tracer, root_ctx, None, timing).await;
    let child1_ctx = child1.context();
    spans.push((Service::Parent, child1.end()));
    tokio::time::sleep(timing.gap).await;

    let child2 = child_operation(tracer, child1_ctx, Some(child1_ctx), timing).await;
    let child2_ctx = child2.context();
    tokio::time::sleep(timing.gap).await;

    for n in 0..3 {
        if n > 0 {
            tokio::time::sleep(timing.gap).await;
        }
        let child3 = child_operation(tracer, child2_ctx, None, timing).await;
        spans.push((Service::Child, child3.end()));
    }
    spans.push((Service::Child, child2.end()));
    tokio::time::sleep(timing.before_child4).await;

    let child4 = child_operation(tracer, child2_ctx, Some(child2_ctx), timing).await;
    let child4_ctx = child4.context();
    spans.push((Service::Parent, child4.end()));

    let child5 = child_operation(tracer, child4_ctx, None, timing).await;
    spans.push((Service::Parent, child5.end()));

    spans
}

#[derive(Debug)]
/// The follows scenario.
pub struct Follows {
    config: Config,
    tracer: Tracer,
    shutdown: Shutdown,
    id: Option<String>,
    metric_labels: Vec<(String, String)>,
}

impl Follows {
    /// Create a new [`Follows`] instance
    ///
    /// # Errors
    ///
    /// This function does not currently return an error.
    pub fn new(
        general: General,
        config: Config,
        seed: [u8; 32],
        shutdown: Shutdown,
    ) -> Result<Self, Error> {
        let metric_labels = MetricsBuilder::new("scenario", "follows")
            .with_id(general.id.as_deref())
            .build();
        Ok(Self {
            config,
            tracer: Tracer::from_seed(seed),
            shutdown,
            id: general.id,
            metric_labels,
        })
    }

    /// Build and ship the trace, or stop early if a shutdown signal is
    /// received.
    ///
    /// # Errors
    ///
    /// Function will return an error if either exporter cannot be created or
    /// stops unexpectedly.
    pub async fn spin(mut self) -> Result<(), Error> {
        let exporter_config =
            exporter::Config::JaegerThriftHttp(Endpoint::new(self.config.endpoint.clone()));
        let parent = Exporter::spawn(
            &exporter_config,
            Resource::new(PARENT_SERVICE),
            self.id.as_deref(),
        )?;
        let child = Exporter::spawn(
            &exporter_config,
            Resource::new(CHILD_SERVICE),
            self.id.as_deref(),
        )?;

        let spans = tokio::select! {
            spans = build_tree(&mut self.tracer, Timing::default()) => Some(spans),
            () = self.shutdown.recv() => {
                info!("shutdown signal received");
                None
            }
        };

        if let Some(spans) = spans {
            let count = spans.len() as u64;
            for (service, span) in spans {
                match service {
                    Service::Parent => parent.export(span).await?,
                    Service::Child => child.export(span).await?,
                }
            }
            counter!("traces_created", &self.metric_labels).increment(1);
            counter!("spans_created", &self.metric_labels).increment(count);
            info!(spans = count, endpoint = %self.config.endpoint, "follows trace built");
        }

        parent.shutdown().await?;
        child.shutdown().await?;
        Ok(())
    }
}
