//! Runs a load test against the key-value server and collects its [`Summary`].

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::aggregate::{Aggregator, Summary};
use crate::client::Client;
use crate::config::Config;
use crate::dispatch;
use crate::error::{Error, Result};
use crate::http::{HttpRemote, Remote};
use crate::workload;

/// A finished load run.
#[derive(Clone, Debug)]
pub struct Run {
    /// The seed the operation sequence was generated with.
    pub seed: u64,
    /// Aggregated outcomes of the run.
    pub summary: Summary,
}

/// Runs the configured workload against the configured HTTP target.
pub async fn run(config: &Config) -> Result<Run> {
    let remote = HttpRemote::from_config(config)?;
    run_against(config, remote).await
}

/// Runs the configured workload against `remote`.
///
/// Every worker sends through its own clone of `remote`. Per-request failures end up in the
/// summary. This only fails for invalid configuration or when outcomes went missing.
pub async fn run_against<R>(config: &Config, remote: R) -> Result<Run>
where
    R: Remote + Clone + 'static,
{
    config.validate()?;
    let workers = config.worker_count()?;
    let seed = config.seed.unwrap_or_else(rand::random);
    let source = workload::generate(config.total_ops, config.mix()?, seed);

    tracing::info!(
        remote = %config.remote,
        total_ops = source.len(),
        workers = workers.get(),
        seed,
        "starting load run"
    );

    let bar = ProgressBar::new(source.len())
        .with_style(ProgressStyle::with_template(
            "{spinner} {msg} {wide_bar} {pos}/{len} {elapsed}",
        )?)
        .with_message("Running load:");
    bar.enable_steady_tick(Duration::from_millis(100));

    let cancel = CancellationToken::new();
    let deadline = config.deadline.map(|deadline| {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            tracing::warn!(?deadline, "deadline expired, stopping workers");
            cancel.cancel();
        })
    });

    let start = Instant::now();
    let mut dispatch = dispatch::dispatch(
        &source,
        workers,
        || {
            Client::new(remote.clone())
                .with_retry(config.retry)
                .with_timeout(config.timeout)
        },
        cancel.clone(),
    );

    let mut aggregator = Aggregator::with_exact_limit(config.exact_percentile_limit);
    while let Some(outcome) = dispatch.next().await {
        aggregator.record(&outcome);
        bar.inc(1);
    }
    let reports = dispatch.join().await;
    let wall_time = start.elapsed();

    bar.finish_and_clear();
    if let Some(deadline) = deadline {
        deadline.abort();
    }

    let executed: u64 = reports?.iter().map(|report| report.executed).sum();
    if executed != aggregator.consumed() {
        return Err(Error::Aggregation {
            expected: executed,
            actual: aggregator.consumed(),
        });
    }

    // Without cancellation, every generated operation must have been executed.
    let expected = if cancel.is_cancelled() {
        executed
    } else {
        source.len()
    };
    let summary = aggregator.finish(expected, wall_time, executed < source.len())?;

    tracing::info!(
        total_ops = summary.total_ops,
        success = summary.success_count,
        errors = summary.error_count(),
        ?wall_time,
        "load run finished"
    );

    Ok(Run { seed, summary })
}
