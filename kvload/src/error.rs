use crate::config::ConfigError;

/// Errors that abort a load run.
///
/// Failures of individual requests never show up here. They are recorded in the
/// [`RequestOutcome`](crate::outcome::RequestOutcome) of the operation instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The remote URL or one of its endpoints could not be parsed.
    #[error("invalid remote URL `{url}`: {message}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// The URL error message.
        message: String,
    },
    /// The underlying [`reqwest`] client could not be created.
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    /// The progress bar template is invalid.
    #[error(transparent)]
    Progress(#[from] indicatif::style::TemplateError),
    /// A worker task panicked before finishing its assignment.
    #[error("worker panicked: {0}")]
    WorkerPanicked(#[from] tokio::task::JoinError),
    /// The number of collected outcomes does not match the number of executed operations.
    #[error("collected {actual} outcomes, but {expected} operations were executed")]
    Aggregation {
        /// Number of operations the workers executed.
        expected: u64,
        /// Number of outcomes that reached the aggregator.
        actual: u64,
    },
    /// Not a single operation could connect to the target.
    #[error("target unreachable: all {attempted} operations failed to connect")]
    Unreachable {
        /// Number of operations that were attempted.
        attempted: u64,
    },
}

/// A convenience alias that defaults our [`Error`] type.
pub type Result<T, E = Error> = std::result::Result<T, E>;
