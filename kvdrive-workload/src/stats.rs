//! Per-operation statistics.
//!
//! Each engine keeps two accumulators: one for the whole run, and a moving
//! window that is reported and reset periodically.

use std::fmt;
use std::time::Duration;

use hdrhistogram::Histogram;
use tokio::time::Instant;

use crate::operation::OperationKind;

/// Highest latency tracked by the histograms (60s, in microseconds).
const LATENCY_MAX_US: u64 = 60_000_000;

#[derive(Debug, Clone)]
struct OpStats {
    requests: u64,
    errors: u64,
    latencies: Histogram<u64>,
}

impl OpStats {
    fn new() -> Self {
        Self {
            requests: 0,
            errors: 0,
            latencies: Histogram::new_with_bounds(1, LATENCY_MAX_US, 3)
                .expect("histogram creation"),
        }
    }
}

/// Request, error and latency accumulator keyed by operation kind.
#[derive(Debug, Clone)]
pub struct Statistics {
    start: Instant,
    per_kind: [OpStats; OperationKind::COUNT],
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

impl Statistics {
    /// Creates an empty accumulator starting now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            per_kind: std::array::from_fn(|_| OpStats::new()),
        }
    }

    /// Records one completed operation.
    #[allow(clippy::cast_possible_truncation)] // Clamped to the histogram range first.
    pub fn put<T, E>(&mut self, kind: OperationKind, elapsed: Duration, outcome: &Result<T, E>) {
        let stats = &mut self.per_kind[kind.index()];
        stats.requests += 1;
        if outcome.is_err() {
            stats.errors += 1;
        }
        let us = elapsed.as_micros().clamp(1, u128::from(LATENCY_MAX_US)) as u64;
        stats.latencies.saturating_record(us);
    }

    /// Total requests across all kinds.
    #[must_use]
    pub fn request_count(&self) -> u64 {
        self.per_kind.iter().map(|s| s.requests).sum()
    }

    /// Total errors across all kinds.
    #[must_use]
    pub fn error_count(&self) -> u64 {
        self.per_kind.iter().map(|s| s.errors).sum()
    }

    /// Requests recorded for `kind`.
    #[must_use]
    pub const fn requests(&self, kind: OperationKind) -> u64 {
        self.per_kind[kind.index()].requests
    }

    /// Errors recorded for `kind`.
    #[must_use]
    pub const fn errors(&self, kind: OperationKind) -> u64 {
        self.per_kind[kind.index()].errors
    }

    /// When this accumulator started.
    #[must_use]
    pub const fn start_time(&self) -> Instant {
        self.start
    }

    /// Restarts the accumulator at `start`, dropping all samples.
    pub fn reset(&mut self, start: Instant) {
        *self = Self::new();
        self.start = start;
    }

    /// Summarizes the accumulator.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn summary(&self) -> StatsSummary {
        let elapsed = self.start.elapsed();
        let per_kind = OperationKind::ALL
            .iter()
            .filter_map(|&kind| {
                let stats = &self.per_kind[kind.index()];
                if stats.requests == 0 {
                    return None;
                }
                let h = &stats.latencies;
                Some(KindSummary {
                    kind,
                    requests: stats.requests,
                    errors: stats.errors,
                    latency_p50_ms: h.value_at_percentile(50.0) as f64 / 1000.0,
                    latency_p95_ms: h.value_at_percentile(95.0) as f64 / 1000.0,
                    latency_p99_ms: h.value_at_percentile(99.0) as f64 / 1000.0,
                    latency_max_ms: h.max() as f64 / 1000.0,
                })
            })
            .collect();

        let requests = self.request_count();
        let secs = elapsed.as_secs_f64();
        StatsSummary {
            requests,
            errors: self.error_count(),
            elapsed,
            throughput: if secs > 0.0 { requests as f64 / secs } else { 0.0 },
            per_kind,
        }
    }

    /// Folds `other` into this accumulator, keeping the earlier start time.
    pub fn merge(&mut self, other: &Self) {
        self.start = self.start.min(other.start);
        for (mine, theirs) in self.per_kind.iter_mut().zip(other.per_kind.iter()) {
            mine.requests += theirs.requests;
            mine.errors += theirs.errors;
            // Both histograms share the same bounds, so adding cannot fail.
            let _ = mine.latencies.add(&theirs.latencies);
        }
    }
}

/// Summary of one operation kind.
#[derive(Debug, Clone, PartialEq)]
pub struct KindSummary {
    /// Operation kind.
    pub kind: OperationKind,
    /// Requests issued.
    pub requests: u64,
    /// Requests that failed.
    pub errors: u64,
    /// Latency p50 in milliseconds.
    pub latency_p50_ms: f64,
    /// Latency p95 in milliseconds.
    pub latency_p95_ms: f64,
    /// Latency p99 in milliseconds.
    pub latency_p99_ms: f64,
    /// Latency max in milliseconds.
    pub latency_max_ms: f64,
}

/// Snapshot of a [`Statistics`] accumulator.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSummary {
    /// Requests across all kinds.
    pub requests: u64,
    /// Errors across all kinds.
    pub errors: u64,
    /// Time since the accumulator started.
    pub elapsed: Duration,
    /// Requests per second over `elapsed`.
    pub throughput: f64,
    /// Per-kind breakdown; kinds with no requests are omitted.
    pub per_kind: Vec<KindSummary>,
}

impl fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "requests={} errors={} elapsed={:.1}s throughput={:.0} req/s",
            self.requests,
            self.errors,
            self.elapsed.as_secs_f64(),
            self.throughput
        )?;
        for k in &self.per_kind {
            writeln!(
                f,
                "  {:<8} n={} err={} p50={:.2}ms p95={:.2}ms p99={:.2}ms max={:.2}ms",
                k.kind.name(),
                k.requests,
                k.errors,
                k.latency_p50_ms,
                k.latency_p95_ms,
                k.latency_p99_ms,
                k.latency_max_ms
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_counts_requests_and_errors() {
        let mut stats = Statistics::new();
        let ok: Result<(), ()> = Ok(());
        let err: Result<(), ()> = Err(());

        stats.put(OperationKind::Get, Duration::from_millis(2), &ok);
        stats.put(OperationKind::Get, Duration::from_millis(4), &err);
        stats.put(OperationKind::Destroy, Duration::from_micros(10), &ok);

        assert_eq!(stats.request_count(), 3);
        assert_eq!(stats.error_count(), 1);
        assert_eq!(stats.requests(OperationKind::Get), 2);
        assert_eq!(stats.errors(OperationKind::Get), 1);
        assert_eq!(stats.requests(OperationKind::Create), 0);
    }

    #[test]
    fn test_summary_omits_idle_kinds() {
        let mut stats = Statistics::new();
        let ok: Result<(), ()> = Ok(());
        for ms in 1..=100 {
            stats.put(OperationKind::Set, Duration::from_millis(ms), &ok);
        }

        let summary = stats.summary();
        assert_eq!(summary.requests, 100);
        assert_eq!(summary.per_kind.len(), 1);
        let set = &summary.per_kind[0];
        assert_eq!(set.kind, OperationKind::Set);
        assert!(set.latency_p50_ms >= 49.0 && set.latency_p50_ms <= 51.0);
        assert!(set.latency_max_ms >= 99.0);
        assert!(summary.to_string().contains("Set"));
    }

    #[test]
    fn test_huge_latency_is_clamped() {
        let mut stats = Statistics::new();
        let ok: Result<(), ()> = Ok(());
        stats.put(OperationKind::Get, Duration::from_secs(3_600), &ok);
        assert_eq!(stats.request_count(), 1);
    }

    #[test]
    fn test_reset_and_merge() {
        let ok: Result<(), ()> = Ok(());
        let mut a = Statistics::new();
        let mut b = Statistics::new();
        a.put(OperationKind::Create, Duration::from_millis(1), &ok);
        b.put(OperationKind::Create, Duration::from_millis(1), &ok);
        b.put(OperationKind::Update, Duration::from_millis(1), &Err::<(), _>(()));

        a.merge(&b);
        assert_eq!(a.request_count(), 3);
        assert_eq!(a.error_count(), 1);

        let now = Instant::now();
        a.reset(now);
        assert_eq!(a.request_count(), 0);
        assert_eq!(a.start_time(), now);
    }
}
