//! The tracegen throttle mechanism
//!
//! Trace generators emit spans in bursts, one trace at a time, and then pause
//! long enough that the cumulative rate matches the configured spans per
//! minute. This library holds that pacing logic, separated from the clock so
//! it can be driven by tests.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::{self, Duration, Instant};

pub mod paced;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(deny_unknown_fields)]
/// Configuration of a throttle.
#[serde(rename_all = "snake_case")]
pub enum Config {
    /// Emit spans as fast as the exporter allows.
    AllOut,
    /// Hold the cumulative emission rate to `spans_per_minute`.
    Paced {
        /// Target rate in spans per minute.
        spans_per_minute: u64,
    },
}

/// Errors produced by [`Throttle`].
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Paced
    #[error(transparent)]
    Paced(#[from] paced::Error),
}

#[async_trait]
/// The `Clock` used for every throttle
pub trait Clock {
    /// The number of ticks, in microseconds, elapsed since the clock was
    /// created
    fn ticks_elapsed(&self) -> u64;
    /// Wait for `ticks` amount of time
    async fn wait(&self, ticks: u64);
}

#[derive(Debug, Clone, Copy)]
/// A clock that operates with respect to real-clock time.
pub struct RealClock {
    start: Instant,
}

impl Default for RealClock {
    fn default() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

#[async_trait]
impl Clock for RealClock {
    /// Return the number of ticks since `Clock` was created, saturating at
    /// `u64::MAX`.
    fn ticks_elapsed(&self) -> u64 {
        let ticks_since: u128 = Instant::now().duration_since(self.start).as_micros();
        u64::try_from(ticks_since).unwrap_or(u64::MAX)
    }

    async fn wait(&self, ticks: u64) {
        time::sleep(Duration::from_micros(ticks)).await;
    }
}

/// The throttle mechanism
#[derive(Debug)]
pub enum Throttle<C = RealClock> {
    /// Spans are paced to a fixed rate with respect to the clock
    Paced(paced::Paced<C>),
    /// Spans are emitted as fast as possible
    AllOut,
}

impl Throttle<RealClock> {
    /// Create a new instance of `Throttle` with a real-time clock
    ///
    /// # Errors
    ///
    /// Returns an error if a paced throttle is configured with a rate of zero.
    pub fn new_with_config(config: Config) -> Result<Self, Error> {
        Self::with_clock(config, RealClock::default())
    }
}

impl<C> Throttle<C>
where
    C: Clock + Sync + Send,
{
    /// Create a new instance of `Throttle` driven by `clock`
    ///
    /// # Errors
    ///
    /// Returns an error if a paced throttle is configured with a rate of zero.
    pub fn with_clock(config: Config, clock: C) -> Result<Self, Error> {
        match config {
            Config::Paced { spans_per_minute } => Ok(Throttle::Paced(paced::Paced::with_clock(
                spans_per_minute,
                clock,
            )?)),
            Config::AllOut => Ok(Throttle::AllOut),
        }
    }

    /// Record that `spans` more spans have been emitted and wait until the
    /// cumulative rate is back at or under the target.
    pub async fn wait_for(&mut self, spans: u64) {
        match self {
            Throttle::Paced(inner) => inner.wait_for(spans).await,
            Throttle::AllOut => (),
        }
    }

    /// Achieved rate in spans per minute, if this throttle keeps track.
    #[must_use]
    pub fn spans_per_minute(&self) -> Option<f64> {
        match self {
            Throttle::Paced(inner) => Some(inner.achieved_rate()),
            Throttle::AllOut => None,
        }
    }
}
