//! The recorded result of executing a single [`Operation`](crate::workload::Operation).

use std::fmt;
use std::time::Duration;

use crate::workload::OpKind;

/// Classification of a failure below the HTTP layer.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TransportErrorKind {
    /// The connection could not be established, including DNS failures and refused connections.
    Connect,
    /// The attempt did not complete within the configured timeout.
    Timeout,
    /// The connection broke down while the request or response was in flight.
    Reset,
    /// The request could not be built or its response could not be read.
    Other,
}

impl TransportErrorKind {
    /// Returns `true` if a retry of the same request may succeed.
    pub fn is_transient(self) -> bool {
        !matches!(self, Self::Other)
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "connect",
            Self::Timeout => "timeout",
            Self::Reset => "reset",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// Final status of an operation after all attempts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Status {
    /// The server answered with a `2xx` status.
    Success,
    /// The server answered with the given non-`2xx` status code.
    HttpError(u16),
    /// A failure that is not worth retrying.
    TransportError(TransportErrorKind),
    /// Every attempt failed transiently. Holds the failure of the last attempt.
    RetryExhausted(TransportErrorKind),
}

impl Status {
    /// Returns the error bucket of this status, or `None` on success.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Success => None,
            Self::HttpError(_) => Some(ErrorKind::Http),
            Self::TransportError(_) => Some(ErrorKind::Transport),
            Self::RetryExhausted(_) => Some(ErrorKind::RetryExhausted),
        }
    }

    /// Returns `true` if the target could not be connected to at all.
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            Self::TransportError(TransportErrorKind::Connect)
                | Self::RetryExhausted(TransportErrorKind::Connect)
        )
    }
}

/// Buckets for counting failed operations in a [`Summary`](crate::aggregate::Summary).
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ErrorKind {
    /// See [`Status::HttpError`].
    Http,
    /// See [`Status::TransportError`].
    Transport,
    /// See [`Status::RetryExhausted`].
    RetryExhausted,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Http => "http error",
            Self::Transport => "transport error",
            Self::RetryExhausted => "retries exhausted",
        };
        f.write_str(name)
    }
}

/// The outcome of one executed operation.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestOutcome {
    /// Index of the operation within the run.
    pub operation_index: u64,
    /// Whether the operation was a read or a write.
    pub kind: OpKind,
    /// Time spent on the operation, including retries and backoff.
    pub latency: Duration,
    /// How the operation ended.
    pub status: Status,
    /// Number of requests sent for this operation.
    pub attempt_count: u32,
}

impl RequestOutcome {
    /// Returns `true` if the operation succeeded.
    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}
