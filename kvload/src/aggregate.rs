//! Folds [`RequestOutcome`]s into a [`Summary`].
//!
//! The [`Aggregator`] consumes outcomes one at a time as they arrive from the workers. It keeps
//! running counts and one latency recorder for the whole run plus one per [`OpKind`].
//!
//! Latency percentiles are exact (nearest rank) as long as a recorder has seen at most
//! `exact_limit` latencies. Beyond that the recorder folds everything into a [`DDSketch`], whose
//! quantiles carry a relative error of about 2%, and the summary is flagged as
//! [`approximate`](Summary::approximate).

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use sketches_ddsketch::DDSketch;

use crate::error::{Error, Result};
use crate::outcome::{ErrorKind, RequestOutcome, Status};
use crate::workload::OpKind;

/// Number of latencies kept verbatim before switching to an approximate sketch.
pub const DEFAULT_EXACT_PERCENTILE_LIMIT: usize = 100_000;

/// Latency distribution of a set of operations.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LatencyStats {
    /// Arithmetic mean.
    pub mean: Duration,
    /// Median.
    pub p50: Duration,
    /// 95th percentile.
    pub p95: Duration,
    /// 99th percentile.
    pub p99: Duration,
    /// Slowest operation.
    pub max: Duration,
}

enum Values {
    Exact(Vec<Duration>),
    Sketch(DDSketch),
}

impl fmt::Debug for Values {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(values) => f.debug_tuple("Exact").field(&values.len()).finish(),
            Self::Sketch(sketch) => f.debug_tuple("Sketch").field(&sketch.count()).finish(),
        }
    }
}

#[derive(Debug)]
struct Latencies {
    limit: usize,
    count: u64,
    sum: Duration,
    values: Values,
}

impl Latencies {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            count: 0,
            sum: Duration::ZERO,
            values: Values::Exact(Vec::new()),
        }
    }

    fn add(&mut self, latency: Duration) {
        self.count += 1;
        self.sum = self.sum.saturating_add(latency);

        match &mut self.values {
            Values::Exact(values) if values.len() < self.limit => values.push(latency),
            Values::Exact(values) => {
                let mut sketch = DDSketch::default();
                for value in values.drain(..) {
                    sketch.add(value.as_secs_f64());
                }
                sketch.add(latency.as_secs_f64());
                self.values = Values::Sketch(sketch);
            }
            Values::Sketch(sketch) => sketch.add(latency.as_secs_f64()),
        }
    }

    fn is_exact(&self) -> bool {
        matches!(self.values, Values::Exact(_))
    }

    fn stats(&self) -> Option<LatencyStats> {
        if self.count == 0 {
            return None;
        }

        let mean = Duration::from_nanos((self.sum.as_nanos() / u128::from(self.count)) as u64);
        let stats = match &self.values {
            Values::Exact(values) => {
                let mut sorted = values.clone();
                sorted.sort_unstable();
                let rank = |q: f64| {
                    let rank = (q * sorted.len() as f64).ceil() as usize;
                    sorted[rank.clamp(1, sorted.len()) - 1]
                };
                LatencyStats {
                    mean,
                    p50: rank(0.5),
                    p95: rank(0.95),
                    p99: rank(0.99),
                    max: sorted[sorted.len() - 1],
                }
            }
            Values::Sketch(sketch) => {
                let quantile = |q: f64| {
                    let secs = sketch.quantile(q).ok().flatten().unwrap_or_default();
                    Duration::from_secs_f64(secs.max(0.0))
                };
                LatencyStats {
                    mean,
                    p50: quantile(0.5),
                    p95: quantile(0.95),
                    p99: quantile(0.99),
                    max: Duration::from_secs_f64(sketch.max().unwrap_or_default().max(0.0)),
                }
            }
        };

        Some(stats)
    }
}

#[derive(Debug)]
struct KindMetrics {
    count: u64,
    success_count: u64,
    latencies: Latencies,
}

/// Aggregate numbers for one [`OpKind`].
#[derive(Clone, Debug, PartialEq)]
pub struct KindSummary {
    /// Number of operations of this kind.
    pub count: u64,
    /// Number of those that succeeded.
    pub success_count: u64,
    /// Latency distribution, `None` if there were no operations of this kind.
    pub latency: Option<LatencyStats>,
}

/// The result of a load run.
#[derive(Clone, Debug, PartialEq)]
pub struct Summary {
    /// Number of executed operations.
    pub total_ops: u64,
    /// Number of operations that succeeded.
    pub success_count: u64,
    /// Number of failed operations per error bucket. Buckets without failures are absent.
    pub error_count_by_kind: BTreeMap<ErrorKind, u64>,
    /// Number of responses per non-`2xx` status code.
    pub http_status_counts: BTreeMap<u16, u64>,
    /// Number of operations that never managed to connect to the target.
    pub connect_failures: u64,
    /// Elapsed time of the whole run.
    pub total_wall_time: Duration,
    /// Latency distribution of all operations, `None` for an empty run.
    pub latency: Option<LatencyStats>,
    /// Breakdown per operation kind.
    pub by_kind: BTreeMap<OpKind, KindSummary>,
    /// Whether percentiles were estimated from a sketch.
    pub approximate: bool,
    /// Whether the run was cut short before all operations were executed.
    pub cancelled: bool,
}

impl Summary {
    /// Total number of failed operations.
    pub fn error_count(&self) -> u64 {
        self.error_count_by_kind.values().sum()
    }

    /// Returns the number of failed operations in one error bucket.
    pub fn errors(&self, kind: ErrorKind) -> u64 {
        self.error_count_by_kind.get(&kind).copied().unwrap_or(0)
    }

    /// Executed operations per second of wall time.
    pub fn throughput(&self) -> f64 {
        let secs = self.total_wall_time.as_secs_f64();
        if secs > 0.0 {
            self.total_ops as f64 / secs
        } else {
            0.0
        }
    }

    /// Returns `true` if operations were executed, but none of them could connect to the target.
    pub fn is_unreachable(&self) -> bool {
        self.total_ops > 0 && self.connect_failures == self.total_ops
    }

    /// Fails with [`Error::Unreachable`] if no operation could connect to the target.
    pub fn ensure_reachable(&self) -> Result<()> {
        if self.is_unreachable() {
            return Err(Error::Unreachable {
                attempted: self.total_ops,
            });
        }
        Ok(())
    }
}

/// Incrementally builds a [`Summary`] from outcomes.
#[derive(Debug)]
pub struct Aggregator {
    exact_limit: usize,
    consumed: u64,
    success_count: u64,
    error_count_by_kind: BTreeMap<ErrorKind, u64>,
    http_status_counts: BTreeMap<u16, u64>,
    connect_failures: u64,
    latencies: Latencies,
    by_kind: BTreeMap<OpKind, KindMetrics>,
}

impl Aggregator {
    /// Creates an aggregator that keeps up to [`DEFAULT_EXACT_PERCENTILE_LIMIT`] exact latencies.
    pub fn new() -> Self {
        Self::with_exact_limit(DEFAULT_EXACT_PERCENTILE_LIMIT)
    }

    /// Creates an aggregator that keeps up to `exact_limit` exact latencies per recorder.
    pub fn with_exact_limit(exact_limit: usize) -> Self {
        Self {
            exact_limit,
            consumed: 0,
            success_count: 0,
            error_count_by_kind: BTreeMap::new(),
            http_status_counts: BTreeMap::new(),
            connect_failures: 0,
            latencies: Latencies::new(exact_limit),
            by_kind: BTreeMap::new(),
        }
    }

    /// Number of outcomes recorded so far.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Records one outcome.
    pub fn record(&mut self, outcome: &RequestOutcome) {
        self.consumed += 1;
        self.latencies.add(outcome.latency);

        let kind = self
            .by_kind
            .entry(outcome.kind)
            .or_insert_with(|| KindMetrics {
                count: 0,
                success_count: 0,
                latencies: Latencies::new(self.exact_limit),
            });
        kind.count += 1;
        kind.latencies.add(outcome.latency);

        match outcome.status.error_kind() {
            None => {
                self.success_count += 1;
                kind.success_count += 1;
            }
            Some(error) => *self.error_count_by_kind.entry(error).or_default() += 1,
        }

        if let Status::HttpError(code) = outcome.status {
            *self.http_status_counts.entry(code).or_default() += 1;
        }
        if outcome.status.is_connect_failure() {
            self.connect_failures += 1;
        }
    }

    /// Builds the summary, checking that exactly `expected` outcomes were recorded.
    pub fn finish(self, expected: u64, wall_time: Duration, cancelled: bool) -> Result<Summary> {
        if self.consumed != expected {
            return Err(Error::Aggregation {
                expected,
                actual: self.consumed,
            });
        }

        Ok(self.into_summary(wall_time, cancelled))
    }

    fn into_summary(self, wall_time: Duration, cancelled: bool) -> Summary {
        let approximate = !self.latencies.is_exact()
            || self.by_kind.values().any(|kind| !kind.latencies.is_exact());

        Summary {
            total_ops: self.consumed,
            success_count: self.success_count,
            error_count_by_kind: self.error_count_by_kind,
            http_status_counts: self.http_status_counts,
            connect_failures: self.connect_failures,
            total_wall_time: wall_time,
            latency: self.latencies.stats(),
            by_kind: self
                .by_kind
                .into_iter()
                .map(|(kind, metrics)| {
                    let summary = KindSummary {
                        count: metrics.count,
                        success_count: metrics.success_count,
                        latency: metrics.latencies.stats(),
                    };
                    (kind, summary)
                })
                .collect(),
            approximate,
            cancelled,
        }
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Summarizes a complete set of outcomes.
pub fn aggregate<'a>(
    outcomes: impl IntoIterator<Item = &'a RequestOutcome>,
    wall_time: Duration,
) -> Summary {
    let mut aggregator = Aggregator::new();
    for outcome in outcomes {
        aggregator.record(outcome);
    }
    aggregator.into_summary(wall_time, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::TransportErrorKind;

    fn outcome(index: u64, kind: OpKind, millis: u64, status: Status) -> RequestOutcome {
        RequestOutcome {
            operation_index: index,
            kind,
            latency: Duration::from_millis(millis),
            status,
            attempt_count: 1,
        }
    }

    fn mixed_outcomes() -> Vec<RequestOutcome> {
        let statuses = [
            Status::Success,
            Status::HttpError(500),
            Status::HttpError(404),
            Status::TransportError(TransportErrorKind::Other),
            Status::RetryExhausted(TransportErrorKind::Timeout),
            Status::RetryExhausted(TransportErrorKind::Connect),
        ];
        (0..60)
            .map(|i| {
                let kind = if i % 2 == 0 { OpKind::Put } else { OpKind::Get };
                outcome(i, kind, i + 1, statuses[i as usize % statuses.len()])
            })
            .collect()
    }

    #[test]
    fn counts_add_up() {
        let outcomes = mixed_outcomes();
        let summary = aggregate(&outcomes, Duration::from_secs(2));

        assert_eq!(summary.total_ops, 60);
        assert_eq!(summary.success_count + summary.error_count(), 60);
        assert_eq!(summary.success_count, 10);
        assert_eq!(summary.errors(ErrorKind::Http), 20);
        assert_eq!(summary.errors(ErrorKind::Transport), 10);
        assert_eq!(summary.errors(ErrorKind::RetryExhausted), 20);
        assert_eq!(summary.http_status_counts, [(404, 10), (500, 10)].into());
        assert_eq!(summary.connect_failures, 10);
        assert!(!summary.is_unreachable());
        assert_eq!(summary.throughput(), 30.0);

        let puts = &summary.by_kind[&OpKind::Put];
        let gets = &summary.by_kind[&OpKind::Get];
        assert_eq!(puts.count + gets.count, 60);
        assert_eq!(puts.success_count + gets.success_count, 10);
    }

    #[test]
    fn exact_percentiles() {
        let outcomes: Vec<_> = (1..=100)
            .map(|i| outcome(i, OpKind::Put, i, Status::Success))
            .collect();
        let summary = aggregate(outcomes.iter().rev(), Duration::from_secs(1));
        let latency = summary.latency.unwrap();

        assert!(!summary.approximate);
        assert_eq!(latency.p50, Duration::from_millis(50));
        assert_eq!(latency.p95, Duration::from_millis(95));
        assert_eq!(latency.p99, Duration::from_millis(99));
        assert_eq!(latency.max, Duration::from_millis(100));
        assert_eq!(latency.mean, Duration::from_micros(50_500));
    }

    #[test]
    fn switches_to_sketch_beyond_limit() {
        let mut aggregator = Aggregator::with_exact_limit(10);
        for i in 1..=1000 {
            aggregator.record(&outcome(i, OpKind::Get, i, Status::Success));
        }
        let debug = format!("{aggregator:?}");
        assert!(debug.contains("Sketch(1000)"), "{debug}");

        let summary = aggregator
            .finish(1000, Duration::from_secs(1), false)
            .unwrap();
        let latency = summary.latency.unwrap();

        assert!(summary.approximate);
        let p50 = latency.p50.as_secs_f64();
        assert!((p50 - 0.5).abs() < 0.5 * 0.03, "p50: {p50}");
        let p99 = latency.p99.as_secs_f64();
        assert!((p99 - 0.99).abs() < 0.99 * 0.03, "p99: {p99}");
    }

    #[test]
    fn detects_lost_outcomes() {
        let mut aggregator = Aggregator::new();
        for outcome in &mixed_outcomes()[..5] {
            aggregator.record(outcome);
        }
        let err = aggregator
            .finish(6, Duration::from_secs(1), false)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Aggregation {
                expected: 6,
                actual: 5
            }
        ));
    }

    #[test]
    fn empty_run() {
        let summary = Aggregator::new()
            .finish(0, Duration::ZERO, false)
            .unwrap();
        assert_eq!(summary.total_ops, 0);
        assert_eq!(summary.latency, None);
        assert!(summary.by_kind.is_empty());
        assert_eq!(summary.throughput(), 0.0);
        assert!(!summary.is_unreachable());
    }

    #[test]
    fn unreachable_when_nothing_connects() {
        let outcomes: Vec<_> = (0..4)
            .map(|i| {
                outcome(
                    i,
                    OpKind::Put,
                    1,
                    Status::RetryExhausted(TransportErrorKind::Connect),
                )
            })
            .collect();
        let summary = aggregate(&outcomes, Duration::from_secs(1));
        assert!(summary.is_unreachable());
    }
}
