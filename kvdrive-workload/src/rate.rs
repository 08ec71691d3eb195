//! Closed-loop request pacing.
//!
//! Pacing is advisory: a controller never drops or reorders requests, it only
//! computes how long to wait before issuing the next one. The correction is
//! sample based: compare how long `n` requests *should* have taken at the
//! target rate with how long they actually took, and sleep off the surplus.

use std::time::Duration;

use tokio::time::Instant;
use tracing::info;

use crate::stats::Statistics;
use crate::values::ValueGenerator;

/// Requests to observe before any correction is applied.
pub const MIN_SAMPLES: u64 = 10;

/// Length of a variable-rate recalibration window.
pub const RECALIBRATION_INTERVAL: Duration = Duration::from_secs(12);

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Returns the delay needed so that `requests` issued over `elapsed` do not
/// exceed `rate` requests per second.
///
/// Zero while fewer than [`MIN_SAMPLES`] requests have been observed, when
/// `rate` is 0 (unlimited), or when the run is already behind schedule.
#[must_use]
pub fn pacing_delay(requests: u64, rate: u32, elapsed: Duration) -> Duration {
    if requests < MIN_SAMPLES || rate == 0 {
        return Duration::ZERO;
    }
    let expected_ns = u128::from(requests) * NANOS_PER_SEC / u128::from(rate);
    let expected = Duration::from_nanos(u64::try_from(expected_ns).unwrap_or(u64::MAX));
    expected.saturating_sub(elapsed)
}

/// Pacing strategy for one engine.
#[derive(Debug, Clone)]
pub enum RateController {
    /// Constant target, measured against the lifetime statistics.
    Fixed {
        /// Requests per second (0 = unlimited).
        target: u32,
    },
    /// Target recomputed every [`RECALIBRATION_INTERVAL`], measured against
    /// the current window.
    Variable {
        /// Requests per second for the current window (0 = unlimited).
        target: u32,
        /// Start of the current window.
        window_start: Instant,
        /// Requests issued in the current window.
        window_requests: u64,
    },
}

impl RateController {
    /// Creates a fixed-rate controller.
    #[must_use]
    pub const fn fixed(target: u32) -> Self {
        Self::Fixed { target }
    }

    /// Creates a variable-rate controller starting at `target`.
    #[must_use]
    pub fn variable(target: u32) -> Self {
        Self::Variable {
            target,
            window_start: Instant::now(),
            window_requests: 0,
        }
    }

    /// Picks the strategy the generator asks for.
    pub fn for_generator<G: ValueGenerator + ?Sized>(target: u32, generator: &mut G) -> Self {
        if generator.is_variable() {
            Self::variable(generator.throughput())
        } else {
            Self::fixed(target)
        }
    }

    /// Current target rate.
    #[must_use]
    pub const fn target(&self) -> u32 {
        match self {
            Self::Fixed { target } | Self::Variable { target, .. } => *target,
        }
    }

    /// Restarts the variable-rate window at `now`.
    pub fn restart(&mut self, now: Instant) {
        if let Self::Variable {
            window_start,
            window_requests,
            ..
        } = self
        {
            *window_start = now;
            *window_requests = 0;
        }
    }

    /// Accounts for one request issued at `op_start` and returns the delay
    /// before the next one.
    pub fn on_request<G: ValueGenerator + ?Sized>(
        &mut self,
        op_start: Instant,
        stats: &Statistics,
        generator: &mut G,
    ) -> Duration {
        match self {
            Self::Fixed { target } => pacing_delay(
                stats.request_count(),
                *target,
                op_start.saturating_duration_since(stats.start_time()),
            ),
            Self::Variable {
                target,
                window_start,
                window_requests,
            } => {
                if op_start.saturating_duration_since(*window_start) > RECALIBRATION_INTERVAL {
                    *target = generator.throughput();
                    *window_start = Instant::now();
                    *window_requests = 0;
                    info!(target_rate = *target, "recalibrated request rate");
                }
                *window_requests += 1;
                pacing_delay(
                    *window_requests,
                    *target,
                    op_start.saturating_duration_since(*window_start),
                )
            }
        }
    }
}
