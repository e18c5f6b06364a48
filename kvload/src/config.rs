//! Configuration for a load run.
//!
//! Configuration can be loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. Command line flags (see [`Overrides`])
//! 2. Environment variables (prefixed with `KVLOAD__`)
//! 3. YAML configuration file (specified via `-c` or `--config` flag)
//! 4. Defaults
//!
//! # Environment Variables
//!
//! Environment variables use `KVLOAD__` as a prefix and double underscores (`__`) to denote nested
//! configuration structures. For example:
//!
//! - `KVLOAD__REMOTE=http://127.0.0.1:3000/` sets the target server
//! - `KVLOAD__RETRY__MAX_RETRIES=5` sets the number of attempts per operation
//!
//! # YAML Configuration File
//!
//! ```yaml
//! remote: http://127.0.0.1:3000/
//! total_ops: 100000
//! workers: 16
//! put_ratio: 0.8
//! timeout: 5s
//!
//! retry:
//!   max_retries: 5
//!   backoff_base: 100ms
//! ```

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

use crate::aggregate::DEFAULT_EXACT_PERCENTILE_LIMIT;
use crate::client::{DEFAULT_TIMEOUT, RetryPolicy};
use crate::workload::Mix;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "KVLOAD__";

/// Upper bound for [`Config::workers`].
pub const MAX_WORKERS: usize = 10_000;

/// Invalid configuration. Reported before any request is sent.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A configuration source could not be read or parsed.
    #[error("failed to load configuration: {0}")]
    Load(#[from] figment::Error),
    /// The configuration file given on the command line does not exist.
    #[error("configuration file `{}` not found", .0.display())]
    MissingFile(PathBuf),
    /// `workers` is zero.
    #[error("`workers` must be at least 1")]
    NoWorkers,
    /// `workers` exceeds [`MAX_WORKERS`].
    #[error("`workers` must be at most {MAX_WORKERS}, got {0}")]
    TooManyWorkers(usize),
    /// `put_ratio` lies outside `[0, 1]`.
    #[error("`put_ratio` must be within [0, 1], got {0}")]
    PutRatio(f64),
    /// `retry.max_retries` is zero.
    #[error("`retry.max_retries` must be at least 1")]
    NoAttempts,
    /// `retry.jitter` is negative or not a number.
    #[error("`retry.jitter` must be a non-negative number, got {0}")]
    Jitter(f64),
    /// `timeout` is zero.
    #[error("`timeout` must be greater than zero")]
    ZeroTimeout,
    /// `remote` is not a valid base URL.
    #[error("invalid `remote` URL `{url}`: {message}")]
    Remote {
        /// The configured URL.
        url: String,
        /// Why the URL was rejected.
        message: String,
    },
}

/// Logging configuration.
///
/// Logs are always written to stderr, so they do not interleave with the report.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// Minimum log level to output.
    ///
    /// The `RUST_LOG` environment variable provides more granular control per module if needed.
    ///
    /// # Default
    ///
    /// `WARN`, so that the progress bar stays readable.
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::WARN,
        }
    }
}

/// All settings of a load run.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the key-value server.
    ///
    /// # Default
    ///
    /// `http://127.0.0.1:3000/`
    pub remote: String,

    /// Path of the write endpoint, relative to [`remote`](Self::remote).
    ///
    /// # Default
    ///
    /// Empty, which targets `remote` itself.
    pub put_path: String,

    /// Path of the read endpoint, relative to [`remote`](Self::remote).
    ///
    /// # Default
    ///
    /// Empty, which targets `remote` itself.
    pub get_path: String,

    /// Number of operations to send.
    ///
    /// # Default
    ///
    /// `5000`
    pub total_ops: u64,

    /// Number of workers sending operations concurrently.
    ///
    /// # Default
    ///
    /// `8`
    pub workers: usize,

    /// Probability of an operation being a `PUT`. The rest are `GET`s.
    ///
    /// # Default
    ///
    /// `1.0` (only writes)
    pub put_ratio: f64,

    /// Seed of the operation sequence. A random seed is chosen if unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    /// Upper bound for every single request attempt.
    ///
    /// # Default
    ///
    /// `30s`
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Overall time limit of the run.
    ///
    /// When it expires, workers stop taking new operations and the outcomes collected so far are
    /// reported. Unset by default.
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub deadline: Option<Duration>,

    /// Number of latencies kept for exact percentiles before switching to an approximate sketch.
    ///
    /// # Default
    ///
    /// `100000`
    pub exact_percentile_limit: usize,

    /// Retry policy for transient transport failures.
    pub retry: RetryPolicy,

    /// Logging configuration.
    pub logging: Logging,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remote: "http://127.0.0.1:3000/".into(),
            put_path: String::new(),
            get_path: String::new(),
            total_ops: 5000,
            workers: 8,
            put_ratio: 1.0,
            seed: None,
            timeout: DEFAULT_TIMEOUT,
            deadline: None,
            exact_percentile_limit: DEFAULT_EXACT_PERCENTILE_LIMIT,
            retry: RetryPolicy::default(),
            logging: Logging::default(),
        }
    }
}

impl Config {
    /// Loads and validates the configuration.
    ///
    /// Sources are merged in the following order (later sources override earlier ones):
    /// 1. Default values
    /// 2. YAML configuration file (if `path` is given)
    /// 3. Environment variables (prefixed with `KVLOAD__`)
    /// 4. `overrides`
    pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            if !path.is_file() {
                return Err(ConfigError::MissingFile(path.to_owned()));
            }
            figment = figment.merge(Yaml::file(path));
        }
        let config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(Serialized::defaults(overrides))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges that the type system does not cover.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.worker_count()?;
        self.mix()?;

        if self.retry.max_retries == 0 {
            return Err(ConfigError::NoAttempts);
        }
        if !(self.retry.jitter >= 0.0 && self.retry.jitter.is_finite()) {
            return Err(ConfigError::Jitter(self.retry.jitter));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }

        let url = Url::parse(&self.remote).map_err(|err| ConfigError::Remote {
            url: self.remote.clone(),
            message: err.to_string(),
        })?;
        if url.cannot_be_a_base() {
            return Err(ConfigError::Remote {
                url: self.remote.clone(),
                message: "not a base URL".into(),
            });
        }

        Ok(())
    }

    /// The number of workers.
    pub fn worker_count(&self) -> Result<NonZeroUsize, ConfigError> {
        if self.workers > MAX_WORKERS {
            return Err(ConfigError::TooManyWorkers(self.workers));
        }
        NonZeroUsize::new(self.workers).ok_or(ConfigError::NoWorkers)
    }

    /// The write/read mix.
    pub fn mix(&self) -> Result<Mix, ConfigError> {
        Mix::new(self.put_ratio).ok_or(ConfigError::PutRatio(self.put_ratio))
    }
}

/// Settings given on the command line. Fields left at `None` keep their configured value.
#[derive(Debug, Default, Serialize)]
pub struct Overrides {
    /// See [`Config::remote`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    /// See [`Config::total_ops`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_ops: Option<u64>,
    /// See [`Config::workers`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    /// See [`Config::put_ratio`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub put_ratio: Option<f64>,
    /// See [`Config::seed`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// See [`Config::timeout`].
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    /// See [`Config::deadline`].
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub deadline: Option<Duration>,
    /// See [`RetryPolicy::max_retries`].
    #[serde(skip_serializing_if = "RetryOverrides::is_empty")]
    pub retry: RetryOverrides,
}

/// Command line overrides for [`RetryPolicy`].
#[derive(Debug, Default, Serialize)]
pub struct RetryOverrides {
    /// See [`RetryPolicy::max_retries`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

impl RetryOverrides {
    fn is_empty(&self) -> bool {
        self.max_retries.is_none()
    }
}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults() {
        figment::Jail::expect_with(|_jail| {
            let config = Config::load(None, &Overrides::default()).unwrap();

            assert_eq!(config.remote, "http://127.0.0.1:3000/");
            assert_eq!(config.total_ops, 5000);
            assert_eq!(config.workers, 8);
            assert_eq!(config.put_ratio, 1.0);
            assert_eq!(config.timeout, Duration::from_secs(30));
            assert_eq!(config.deadline, None);
            assert_eq!(config.seed, None);
            assert_eq!(config.retry, RetryPolicy::default());
            assert_eq!(config.logging.level, LevelFilter::WARN);

            Ok(())
        });
    }

    #[test]
    fn configurable_via_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("KVLOAD__REMOTE", "http://localhost:8888/");
            jail.set_env("KVLOAD__TOTAL_OPS", "100");
            jail.set_env("KVLOAD__PUT_RATIO", "0.25");
            jail.set_env("KVLOAD__TIMEOUT", "2s");
            jail.set_env("KVLOAD__DEADLINE", "1m");
            jail.set_env("KVLOAD__RETRY__MAX_RETRIES", "5");
            jail.set_env("KVLOAD__RETRY__BACKOFF_BASE", "100ms");
            jail.set_env("KVLOAD__LOGGING__LEVEL", "debug");

            let config = Config::load(None, &Overrides::default()).unwrap();

            assert_eq!(config.remote, "http://localhost:8888/");
            assert_eq!(config.total_ops, 100);
            assert_eq!(config.put_ratio, 0.25);
            assert_eq!(config.timeout, Duration::from_secs(2));
            assert_eq!(config.deadline, Some(Duration::from_secs(60)));
            assert_eq!(config.retry.max_retries, 5);
            assert_eq!(config.retry.backoff_base, Duration::from_millis(100));
            assert_eq!(config.retry.jitter, 0.1);
            assert_eq!(config.logging.level, LevelFilter::DEBUG);

            Ok(())
        });
    }

    #[test]
    fn configurable_via_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            remote: http://localhost:9000/kv/
            get_path: read
            workers: 3
            seed: 42
            retry:
                jitter: 0.0
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|_jail| {
            let config = Config::load(Some(tempfile.path()), &Overrides::default()).unwrap();

            assert_eq!(config.remote, "http://localhost:9000/kv/");
            assert_eq!(config.put_path, "");
            assert_eq!(config.get_path, "read");
            assert_eq!(config.workers, 3);
            assert_eq!(config.seed, Some(42));
            assert_eq!(config.retry.jitter, 0.0);
            assert_eq!(config.retry.max_retries, 3);

            Ok(())
        });
    }

    #[test]
    fn flags_override_env_override_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            workers: 3
            total_ops: 10
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|jail| {
            jail.set_env("KVLOAD__WORKERS", "4");
            jail.set_env("KVLOAD__RETRY__MAX_RETRIES", "7");

            let config = Config::load(Some(tempfile.path()), &Overrides::default()).unwrap();
            assert_eq!(config.workers, 4);
            assert_eq!(config.total_ops, 10);

            let overrides = Overrides {
                workers: Some(5),
                timeout: Some(Duration::from_millis(250)),
                retry: RetryOverrides {
                    max_retries: Some(2),
                },
                ..Default::default()
            };
            let config = Config::load(Some(tempfile.path()), &overrides).unwrap();
            assert_eq!(config.workers, 5);
            assert_eq!(config.total_ops, 10);
            assert_eq!(config.timeout, Duration::from_millis(250));
            assert_eq!(config.retry.max_retries, 2);
            assert_eq!(config.retry.backoff_base, Duration::from_millis(500));

            Ok(())
        });
    }

    #[test]
    fn rejects_invalid_values() {
        figment::Jail::expect_with(|_jail| {
            let load = |overrides: Overrides| Config::load(None, &overrides).unwrap_err();

            let err = load(Overrides {
                workers: Some(0),
                ..Default::default()
            });
            assert!(matches!(err, ConfigError::NoWorkers), "{err:?}");

            let err = load(Overrides {
                workers: Some(usize::MAX),
                ..Default::default()
            });
            assert!(matches!(err, ConfigError::TooManyWorkers(_)), "{err:?}");

            let err = load(Overrides {
                put_ratio: Some(1.5),
                ..Default::default()
            });
            assert!(matches!(err, ConfigError::PutRatio(_)), "{err:?}");

            let err = load(Overrides {
                retry: RetryOverrides {
                    max_retries: Some(0),
                },
                ..Default::default()
            });
            assert!(matches!(err, ConfigError::NoAttempts), "{err:?}");

            let err = load(Overrides {
                timeout: Some(Duration::ZERO),
                ..Default::default()
            });
            assert!(matches!(err, ConfigError::ZeroTimeout), "{err:?}");

            let err = load(Overrides {
                remote: Some("127.0.0.1:3000".into()),
                ..Default::default()
            });
            assert!(matches!(err, ConfigError::Remote { .. }), "{err:?}");

            Ok(())
        });
    }

    #[test]
    fn rejects_malformed_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("KVLOAD__WORKERS", "many");

            let err = Config::load(None, &Overrides::default()).unwrap_err();
            assert!(matches!(err, ConfigError::Load(_)), "{err:?}");

            Ok(())
        });
    }

    #[test]
    fn missing_config_file() {
        figment::Jail::expect_with(|_jail| {
            let err = Config::load(Some(Path::new("missing.yaml")), &Overrides::default())
                .unwrap_err();
            assert!(matches!(err, ConfigError::MissingFile(_)), "{err:?}");

            Ok(())
        });
    }
}
