//! Pieces shared by scenarios and exporters.

use bytes::Bytes;
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use rand::distr::uniform::SampleUniform;
use serde::{Deserialize, Serialize};

/// A value drawn fresh each time it is needed, either fixed or uniformly from
/// an inclusive range.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq, Copy)]
#[serde(deny_unknown_fields)]
#[serde(rename_all = "snake_case")]
pub enum ConfRange<T>
where
    T: PartialOrd + Copy,
{
    /// Always `T`
    Constant(T),
    /// Anywhere from `min` to `max`, both included
    Inclusive {
        /// Smallest value drawn
        min: T,
        /// Largest value drawn
        max: T,
    },
}

impl<T> ConfRange<T>
where
    T: PartialOrd + Copy,
{
    /// Reject ranges nothing can be drawn from.
    pub(crate) fn check(&self) -> Result<(), &'static str> {
        match self {
            Self::Inclusive { min, max } if min > max => {
                Err("min must be less than or equal to max")
            }
            _ => Ok(()),
        }
    }
}

impl<T> ConfRange<T>
where
    T: PartialOrd + Copy + SampleUniform,
{
    pub(crate) fn sample<R>(&self, rng: &mut R) -> T
    where
        R: rand::Rng + ?Sized,
    {
        match *self {
            Self::Constant(c) => c,
            Self::Inclusive { min, max } => rng.random_range(min..=max),
        }
    }
}

/// Builder for consistent metric labels across scenarios and exporters
#[derive(Debug, Clone)]
pub(crate) struct MetricsBuilder {
    labels: Vec<(String, String)>,
}

impl MetricsBuilder {
    /// Create a new metrics builder with standard component labels
    pub(crate) fn new(component: &str, component_name: &str) -> Self {
        Self {
            labels: vec![
                ("component".to_string(), component.to_string()),
                ("component_name".to_string(), component_name.to_string()),
            ],
        }
    }

    /// Add an ID label if provided
    pub(crate) fn with_id(mut self, id: Option<&str>) -> Self {
        if let Some(id) = id {
            self.labels.push(("id".to_string(), id.to_string()));
        }
        self
    }

    /// Add a custom label
    pub(crate) fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.push((key.to_string(), value.to_string()));
        self
    }

    /// Build the final label vector
    pub(crate) fn build(self) -> Vec<(String, String)> {
        self.labels
    }
}

/// Wrap `bytes` as a request body for the hyper client.
pub(crate) fn full(bytes: Bytes) -> BoxBody<Bytes, hyper::Error> {
    Full::new(bytes).map_err(|never| match never {}).boxed()
}
