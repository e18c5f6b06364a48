//! Sends a configurable volume of `PUT` and `GET` requests to a key-value server and prints
//! throughput and latency statistics.
//!
//! Settings are read from an optional YAML file (`-c`), `KVLOAD__` environment variables and the
//! flags below, in increasing order of precedence. See [`kvload::config`] for all options.

use std::path::PathBuf;

use anyhow::Context;
use argh::FromArgs;

use kvload::config::{Config, Overrides, RetryOverrides};
use kvload::observability::initialize_tracing;

/// Load generator for a JSON-over-HTTP key-value server
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    /// base URL of the server [default: http://127.0.0.1:3000/]
    #[argh(option)]
    remote: Option<String>,

    /// number of operations to send [default: 5000]
    #[argh(option, short = 'n')]
    total_ops: Option<u64>,

    /// number of concurrent workers [default: 8]
    #[argh(option, short = 'w')]
    workers: Option<usize>,

    /// fraction of operations that are writes, within [0, 1] [default: 1.0]
    #[argh(option)]
    put_ratio: Option<f64>,

    /// attempts per operation before giving up on transient failures [default: 3]
    #[argh(option)]
    max_retries: Option<u32>,

    /// upper bound for a single request attempt, such as `500ms` [default: 30s]
    #[argh(option)]
    timeout: Option<humantime::Duration>,

    /// stop taking new operations after this long, such as `1m`
    #[argh(option)]
    deadline: Option<humantime::Duration>,

    /// seed of the operation sequence [default: random]
    #[argh(option)]
    seed: Option<u64>,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            remote: self.remote.clone(),
            total_ops: self.total_ops,
            workers: self.workers,
            put_ratio: self.put_ratio,
            seed: self.seed,
            timeout: self.timeout.map(Into::into),
            deadline: self.deadline.map(Into::into),
            retry: RetryOverrides {
                max_retries: self.max_retries,
            },
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args: Args = argh::from_env();

    let config = Config::load(args.config.as_deref(), &args.overrides())
        .context("invalid configuration")?;

    let threads = std::thread::available_parallelism()
        .map_or(1, |n| n.get())
        .min(config.workers);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("kvload-rt")
        .enable_all()
        .worker_threads(threads)
        .build()?;
    let _runtime_guard = runtime.enter();

    initialize_tracing(&config);
    tracing::debug!(?config);

    let run = runtime.block_on(kvload::run(&config))?;
    kvload::report::print_run(&config, &run);

    run.summary.ensure_reachable()?;
    Ok(())
}
