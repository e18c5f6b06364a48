//! Prints the [`Summary`] of a load run to stdout.

use std::time::Duration;

use yansi::Paint;

use crate::aggregate::{LatencyStats, Summary};
use crate::config::Config;
use crate::harness::Run;
use crate::outcome::ErrorKind;

/// Prints a human-readable report of `run`.
pub fn print_run(config: &Config, run: &Run) {
    let summary = &run.summary;

    println!();
    println!(
        "{} {} (workers: {}, put ratio: {}, seed: {})",
        "## Load run against".bold(),
        config.remote.bold().blue(),
        config.workers.bold(),
        config.put_ratio,
        run.seed
    );

    print!("{} ({} ops", "TOTAL:".bold().green(), summary.total_ops.bold());
    if summary.error_count() > 0 {
        print!(
            ", {}",
            format!("{} FAILURES", summary.error_count()).bold().red()
        );
    }
    println!(")");
    println!(
        "  {:.2?} elapsed, {:.2} operations/s",
        summary.total_wall_time.bold(),
        summary.throughput().bold()
    );
    print_errors(summary);
    if let Some(latency) = &summary.latency {
        print_latency(latency);
    }

    for (kind, kind_summary) in &summary.by_kind {
        let failures = kind_summary.count - kind_summary.success_count;
        print!(
            "{} ({} ops",
            format!("{kind}:").bold().green(),
            kind_summary.count.bold()
        );
        if failures > 0 {
            print!(", {}", format!("{failures} FAILURES").bold().red());
        }
        println!(")");
        if let Some(latency) = &kind_summary.latency {
            print_latency(latency);
        }
    }

    if summary.approximate {
        println!("{}", "note: percentiles are approximated".dim());
    }
    if summary.cancelled {
        println!(
            "{}",
            format!(
                "note: deadline expired after {} of {} operations",
                summary.total_ops, config.total_ops
            )
            .yellow()
        );
    }
}

fn print_errors(summary: &Summary) {
    for (kind, count) in &summary.error_count_by_kind {
        print!("  {}: {}", kind, count.red());
        if *kind == ErrorKind::Http {
            let codes: Vec<_> = summary
                .http_status_counts
                .iter()
                .map(|(code, count)| format!("{code}: {count}"))
                .collect();
            print!(" ({})", codes.join(", "));
        }
        println!();
    }
}

fn print_latency(latency: &LatencyStats) {
    let fmt = |duration: Duration| format!("{duration:.2?}");
    println!(
        "  avg: {}; p50: {}; p95: {}; p99: {}; max: {}",
        fmt(latency.mean).bold(),
        fmt(latency.p50),
        fmt(latency.p95),
        fmt(latency.p99),
        fmt(latency.max)
    );
}
