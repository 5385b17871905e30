//! Paced throttle
//!
//! This throttle holds the cumulative emission rate to a target. After `n`
//! spans at `r` spans per minute the caller must not be ahead of `n * 60s / r`
//! since the throttle was created. Falling behind is never paid back with a
//! burst beyond what the schedule allows, it is simply not slept for.

use super::{Clock, RealClock};

// One minute, in ticks. Each tick is one microsecond.
const MINUTE_TICKS: u128 = 60_000_000;

/// Errors produced by [`Paced`].
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A rate of zero spans per minute can never be satisfied.
    #[error("spans per minute must be greater than zero")]
    ZeroRate,
}

#[derive(Debug)]
/// A throttle that paces span emission against the clock.
pub struct Paced<C = RealClock> {
    schedule: Schedule,
    clock: C,
}

impl<C> Paced<C>
where
    C: Clock + Send + Sync,
{
    pub(crate) fn with_clock(spans_per_minute: u64, clock: C) -> Result<Self, Error> {
        Ok(Self {
            schedule: Schedule::new(spans_per_minute)?,
            clock,
        })
    }

    pub(crate) async fn wait_for(&mut self, spans: u64) {
        let slop = self.schedule.request(self.clock.ticks_elapsed(), spans);
        if slop > 0 {
            self.clock.wait(slop).await;
        }
    }

    pub(crate) fn achieved_rate(&self) -> f64 {
        self.schedule.rate(self.clock.ticks_elapsed())
    }
}

/// The non-async interior of `Paced`.
#[derive(Debug, Clone, Copy)]
struct Schedule {
    spans_per_minute: u64,
    /// Total spans recorded since creation.
    emitted: u64,
}

impl Schedule {
    fn new(spans_per_minute: u64) -> Result<Self, Error> {
        if spans_per_minute == 0 {
            return Err(Error::ZeroRate);
        }
        Ok(Self {
            spans_per_minute,
            emitted: 0,
        })
    }

    /// The tick at which the `emitted` total is on schedule.
    fn due(&self) -> u64 {
        let due = u128::from(self.emitted) * MINUTE_TICKS / u128::from(self.spans_per_minute);
        u64::try_from(due).unwrap_or(u64::MAX)
    }

    /// Record `spans` and return how many ticks the caller must wait, given
    /// the absolute `ticks_elapsed`, to remain on schedule.
    fn request(&mut self, ticks_elapsed: u64, spans: u64) -> u64 {
        self.emitted = self.emitted.saturating_add(spans);
        self.due().saturating_sub(ticks_elapsed)
    }

    fn rate(&self, ticks_elapsed: u64) -> f64 {
        if ticks_elapsed == 0 {
            return 0.0;
        }
        self.emitted as f64 * MINUTE_TICKS as f64 / ticks_elapsed as f64
    }
}
