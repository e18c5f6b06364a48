//! Contains a remote implementation using HTTP to interact with the key-value server.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Serialize;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::outcome::TransportErrorKind;
use crate::workload::Operation;

const USER_AGENT: &str = concat!("kvload/", env!("CARGO_PKG_VERSION"));

/// Returns the time allowed for establishing a connection within an attempt of `timeout`.
///
/// This is strictly shorter than the attempt itself, so that a target that never accepts
/// connections is reported as [`Connect`](TransportErrorKind::Connect) rather than
/// [`Timeout`](TransportErrorKind::Timeout).
pub fn connect_timeout(timeout: Duration) -> Duration {
    timeout / 2
}

/// A collaborator that executes a single attempt of an [`Operation`].
///
/// Implementations report the response status, or classify why no response was received. Retries
/// and timeouts are applied on top by [`Client`](crate::client::Client).
#[async_trait]
pub trait Remote: fmt::Debug + Send + Sync {
    /// Sends one request for `op`.
    async fn send(&self, op: &Operation) -> Result<StatusCode, TransportErrorKind>;
}

#[async_trait]
impl<R: Remote + ?Sized> Remote for Arc<R> {
    async fn send(&self, op: &Operation) -> Result<StatusCode, TransportErrorKind> {
        (**self).send(op).await
    }
}

#[derive(Serialize)]
struct GetBody<'a> {
    key: &'a str,
}

/// A remote implementation using HTTP to interact with the key-value server.
///
/// Clones share the same connection pool.
#[derive(Clone, Debug)]
pub struct HttpRemote {
    client: reqwest::Client,
    put_url: Url,
    get_url: Url,
}

impl HttpRemote {
    /// Creates a new `HttpRemote` for the given base URL with default endpoints and timeouts.
    pub fn new(remote: &str) -> Result<Self> {
        let defaults = Config::default();
        Self::build(
            remote,
            &defaults.put_path,
            &defaults.get_path,
            defaults.timeout,
            defaults.workers,
        )
    }

    /// Creates an `HttpRemote` for the target and limits in `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::build(
            &config.remote,
            &config.put_path,
            &config.get_path,
            config.timeout,
            config.workers,
        )
    }

    fn build(
        remote: &str,
        put_path: &str,
        get_path: &str,
        timeout: Duration,
        pool_size: usize,
    ) -> Result<Self> {
        let mut base = Url::parse(remote).map_err(|err| Error::InvalidUrl {
            url: remote.to_owned(),
            message: err.to_string(),
        })?;
        // `Url::join` replaces the last path segment unless the base ends in a slash.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let join = |path: &str| {
            base.join(path.trim_start_matches('/'))
                .map_err(|err| Error::InvalidUrl {
                    url: format!("{base}{path}"),
                    message: err.to_string(),
                })
        };

        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout(timeout))
            .timeout(timeout)
            .pool_max_idle_per_host(pool_size)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            put_url: join(put_path)?,
            get_url: join(get_path)?,
            client,
        })
    }

    /// The URL that `PUT` requests are sent to.
    pub fn put_url(&self) -> &Url {
        &self.put_url
    }

    /// The URL that `GET` requests are sent to.
    pub fn get_url(&self) -> &Url {
        &self.get_url
    }
}

#[async_trait]
impl Remote for HttpRemote {
    async fn send(&self, op: &Operation) -> Result<StatusCode, TransportErrorKind> {
        let request = match op {
            Operation::Put { key, value } => {
                let mut body = serde_json::Map::new();
                body.insert(key.clone(), value.clone().into());
                let body = serde_json::to_string(&body).map_err(|_| TransportErrorKind::Other)?;
                self.client.put(self.put_url.clone()).body(body)
            }
            // `json` also sets `Content-Type: application/json`.
            Operation::Get { key } => self.client.get(self.get_url.clone()).json(&GetBody { key }),
        };

        let response = request.send().await.map_err(|err| classify(&err))?;
        let status = response.status();

        // Drain the body so the connection returns to the pool.
        response.bytes().await.map_err(|err| classify(&err))?;

        Ok(status)
    }
}

fn classify(err: &reqwest::Error) -> TransportErrorKind {
    // Connect timeouts carry both flags.
    if err.is_connect() {
        TransportErrorKind::Connect
    } else if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_builder() || err.is_decode() || err.is_redirect() {
        TransportErrorKind::Other
    } else {
        TransportErrorKind::Reset
    }
}
