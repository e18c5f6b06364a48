//! Executes operations against a [`Remote`] with a bounded timeout and retries.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::http::{HttpRemote, Remote};
use crate::outcome::{RequestOutcome, Status, TransportErrorKind};
use crate::workload::Operation;

/// Default upper bound for a single attempt.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Backoff stops growing after this many doublings.
const MAX_BACKOFF_DOUBLINGS: u32 = 16;

/// How an operation is retried after transient transport failures.
///
/// HTTP error statuses are never retried, since they are an answer from the server rather than a
/// failure to reach it.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of attempts per operation, including the first one.
    pub max_retries: u32,
    /// Pause after the first failed attempt. Doubles with every further failure.
    #[serde(with = "humantime_serde")]
    pub backoff_base: Duration,
    /// Upper bound of the random extra fraction added to each pause.
    pub jitter: f64,
}

impl RetryPolicy {
    /// Returns the pause after `failed` failed attempts, without jitter.
    pub fn backoff(&self, failed: u32) -> Duration {
        let doublings = failed.saturating_sub(1).min(MAX_BACKOFF_DOUBLINGS);
        self.backoff_base.saturating_mul(1 << doublings)
    }

    fn jittered_backoff(&self, failed: u32) -> Duration {
        let backoff = self.backoff(failed);
        if self.jitter <= 0.0 {
            return backoff;
        }

        let scale = 1.0 + rand::rng().random_range(0.0..=self.jitter);
        backoff.mul_f64(scale)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
            jitter: 0.1,
        }
    }
}

/// Executes single [`Operation`]s and records their [`RequestOutcome`].
///
/// Every attempt is bounded by the client's timeout, regardless of what the remote does. A timed
/// out attempt counts as a transient failure.
#[derive(Clone, Debug)]
pub struct Client<R = HttpRemote> {
    remote: R,
    retry: RetryPolicy,
    timeout: Duration,
}

impl<R: Remote> Client<R> {
    /// Creates a client with the default retry policy and timeout.
    pub fn new(remote: R) -> Self {
        Self {
            remote,
            retry: RetryPolicy::default(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Replaces the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replaces the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The remote this client sends requests to.
    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Executes the operation at `index`, retrying transient failures.
    ///
    /// This never fails. Errors are recorded in the status of the returned outcome.
    pub async fn execute(&self, index: u64, op: &Operation) -> RequestOutcome {
        let start = Instant::now();
        let max_attempts = self.retry.max_retries.max(1);
        let mut attempt = 0;

        let status = loop {
            attempt += 1;

            let result = tokio::time::timeout(self.timeout, self.remote.send(op))
                .await
                .unwrap_or(Err(TransportErrorKind::Timeout));

            match result {
                Ok(code) if code.is_success() => break Status::Success,
                Ok(code) => break Status::HttpError(code.as_u16()),
                Err(kind) if !kind.is_transient() => break Status::TransportError(kind),
                Err(kind) if attempt >= max_attempts => {
                    tracing::debug!(index, attempt, error = %kind, "retries exhausted");
                    break Status::RetryExhausted(kind);
                }
                Err(kind) => {
                    let backoff = self.retry.jittered_backoff(attempt);
                    tracing::debug!(index, attempt, error = %kind, ?backoff, "retrying operation");
                    tokio::time::sleep(backoff).await;
                }
            }
        };

        RequestOutcome {
            operation_index: index,
            kind: op.kind(),
            latency: start.elapsed(),
            status,
            attempt_count: attempt,
        }
    }
}
