//! A load generator for key-value servers that speak a minimal JSON-over-HTTP protocol.
//!
//! A load run sends a configurable number of `PUT` and `GET` requests, spread across a fixed pool
//! of concurrent workers, and reports throughput and latency percentiles:
//!
//! - The [`workload`] module generates a deterministic, lazily computed sequence of operations.
//! - The [`client`] executes single operations through a [`Remote`](http::Remote), bounding every
//!   attempt with a timeout and retrying transient failures with exponential backoff.
//! - The [`dispatch`] module partitions the sequence across workers and streams their outcomes
//!   over a channel.
//! - The [`aggregate`] module folds outcomes into a [`Summary`].
//!
//! [`harness::run`] wires everything together for a [`Config`](config::Config).
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod aggregate;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod harness;
pub mod http;
pub mod observability;
pub mod outcome;
pub mod report;
pub mod workload;

pub use crate::aggregate::Summary;
pub use crate::error::{Error, Result};
pub use crate::harness::run;
