use std::net::TcpListener;
use std::time::Duration;

use kvload::Error;
use kvload::client::RetryPolicy;
use kvload::config::Config;
use kvload::outcome::ErrorKind;
use kvload::workload::{Mix, OpKind, Operation, generate};
use kvload_test::server::{Behavior, TestServer};

fn config(server: &TestServer, total_ops: u64, workers: usize) -> Config {
    Config {
        remote: server.url("/"),
        total_ops,
        workers,
        seed: Some(1),
        ..Default::default()
    }
}

fn fast_retries(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        backoff_base: Duration::from_millis(10),
        jitter: 0.0,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn writes_every_operation() {
    kvload_test::tracing::init();
    let server = TestServer::new().await;

    let run = kvload::run(&config(&server, 10, 3)).await.unwrap();
    let summary = run.summary;

    assert_eq!(summary.total_ops, 10);
    assert_eq!(summary.success_count, 10);
    assert_eq!(summary.error_count(), 0);
    assert!(summary.latency.is_some());

    assert_eq!(server.requests(), 10);
    assert_eq!(server.len(), 10);
    for i in 0..10 {
        assert_eq!(server.value(&i.to_string()), Some(i.to_string()));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn default_endpoints_target_server_root() {
    kvload_test::tracing::init();
    // The server only routes `PUT /` and `GET /`.
    let server = TestServer::new().await;

    let config = Config {
        put_ratio: 0.5,
        ..config(&server, 50, 1)
    };
    assert!(config.put_path.is_empty());
    assert!(config.get_path.is_empty());

    let summary = kvload::run(&config).await.unwrap().summary;

    assert_eq!(server.requests(), 50);
    let puts = &summary.by_kind[&OpKind::Put];
    assert_eq!(puts.success_count, puts.count);
    assert_eq!(server.len() as u64, puts.count);
    let gets = &summary.by_kind[&OpKind::Get];
    assert!(gets.success_count > 0, "no read found a value");
}

#[tokio::test(flavor = "multi_thread")]
async fn reads_back_written_keys() {
    kvload_test::tracing::init();
    let server = TestServer::new().await;

    // A single worker executes in index order, so every read of a written key finds it.
    let config = Config {
        put_ratio: 0.5,
        ..config(&server, 200, 1)
    };
    let summary = kvload::run(&config).await.unwrap().summary;

    let source = generate(200, Mix::new(0.5).unwrap(), 1);
    let missing = source
        .iter()
        .filter(|op| match op {
            Operation::Get { key } => key
                .parse()
                .ok()
                .and_then(|index| source.get(index))
                .is_none_or(|target| target.kind() == OpKind::Get),
            Operation::Put { .. } => false,
        })
        .count() as u64;

    assert_eq!(summary.total_ops, 200);
    assert_eq!(summary.success_count, 200 - missing);
    assert_eq!(summary.errors(ErrorKind::Http), missing);
    assert!(summary.http_status_counts.keys().all(|code| *code == 404));

    let puts = &summary.by_kind[&OpKind::Put];
    assert_eq!(puts.success_count, puts.count);
}

#[tokio::test(flavor = "multi_thread")]
async fn server_errors_are_recorded_not_retried() {
    kvload_test::tracing::init();
    let server = TestServer::with_behavior(Behavior::Status(500)).await;

    let summary = kvload::run(&config(&server, 10, 3)).await.unwrap().summary;

    assert_eq!(summary.success_count, 0);
    assert_eq!(summary.errors(ErrorKind::Http), 10);
    assert_eq!(summary.http_status_counts, [(500, 10)].into());
    assert_eq!(server.requests(), 10);
    assert!(summary.ensure_reachable().is_ok());
}

#[tokio::test(flavor = "multi_thread")]
async fn stalled_server_times_out() {
    kvload_test::tracing::init();
    let server = TestServer::with_behavior(Behavior::Stall).await;

    let config = Config {
        timeout: Duration::from_millis(200),
        retry: fast_retries(2),
        ..config(&server, 4, 2)
    };
    let summary = kvload::run(&config).await.unwrap().summary;

    assert_eq!(summary.total_ops, 4);
    assert_eq!(summary.errors(ErrorKind::RetryExhausted), 4);
    assert_eq!(summary.connect_failures, 0);
    assert_eq!(server.requests(), 8);
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_target_fails_the_run() {
    kvload_test::tracing::init();

    // Reserve a free port, then close it again so that connections are refused.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let config = Config {
        remote: format!("http://127.0.0.1:{port}/"),
        total_ops: 6,
        workers: 3,
        retry: fast_retries(3),
        ..Default::default()
    };
    let summary = kvload::run(&config).await.unwrap().summary;

    assert_eq!(summary.errors(ErrorKind::RetryExhausted), 6);
    assert!(summary.is_unreachable());
    let err = summary.ensure_reachable().unwrap_err();
    assert!(matches!(err, Error::Unreachable { attempted: 6 }), "{err:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn deadline_reports_partial_results() {
    kvload_test::tracing::init();
    let server = TestServer::with_behavior(Behavior::Stall).await;

    let config = Config {
        timeout: Duration::from_millis(100),
        retry: fast_retries(1),
        deadline: Some(Duration::from_millis(350)),
        ..config(&server, 100, 2)
    };
    let summary = kvload::run(&config).await.unwrap().summary;

    assert!(summary.cancelled);
    assert!(summary.total_ops > 0);
    assert!(summary.total_ops < 100);
    assert_eq!(
        summary.errors(ErrorKind::RetryExhausted),
        summary.total_ops
    );
}
