//! Partitions a run across a pool of workers, drives them concurrently and streams their
//! [`RequestOutcome`]s back to the caller.
//!
//! Every worker runs as its own task on the multi-threaded runtime and owns its [`Client`]. The
//! only state shared between workers is the sending half of a bounded channel. The receiving half
//! is held by [`Dispatch`], so aggregation happens in exactly one place and no outcome can be
//! counted twice.

use std::num::NonZeroUsize;
use std::ops::Range;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::Client;
use crate::error::Result;
use crate::http::Remote;
use crate::outcome::RequestOutcome;
use crate::workload::OperationSource;

/// Outcomes each worker may buffer before it waits for the receiver.
const CHANNEL_CAPACITY_PER_WORKER: usize = 64;

/// A contiguous, half-open range of operation indices assigned to one worker.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WorkerAssignment {
    /// Position of the worker in the pool.
    pub worker: usize,
    /// First index of the range.
    pub start: u64,
    /// First index past the range.
    pub end: u64,
}

impl WorkerAssignment {
    /// The number of operations in this assignment.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Returns `true` if this assignment contains no operations.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// The indices covered by this assignment.
    pub fn range(&self) -> Range<u64> {
        self.start..self.end
    }
}

/// Splits `[0, total_ops)` into one contiguous assignment per worker.
///
/// Every worker receives `total_ops / worker_count` operations, and the last worker additionally
/// takes the remainder. The assignments cover the range exactly, without gaps or overlaps.
pub fn partition(total_ops: u64, worker_count: NonZeroUsize) -> Vec<WorkerAssignment> {
    let workers = worker_count.get() as u64;
    let step = total_ops / workers;

    (0..workers)
        .map(|i| WorkerAssignment {
            worker: i as usize,
            start: i * step,
            end: if i + 1 == workers {
                total_ops
            } else {
                (i + 1) * step
            },
        })
        .collect()
}

/// What a worker did with its assignment.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WorkerReport {
    /// The range the worker was given.
    pub assignment: WorkerAssignment,
    /// The number of operations the worker executed and sent an outcome for.
    pub executed: u64,
}

/// Executes one [`WorkerAssignment`] in index order.
#[derive(Debug)]
pub struct Worker<R> {
    assignment: WorkerAssignment,
    client: Client<R>,
}

impl<R: Remote> Worker<R> {
    /// Creates a worker for `assignment` that sends its requests through `client`.
    pub fn new(assignment: WorkerAssignment, client: Client<R>) -> Self {
        Self { assignment, client }
    }

    /// Executes every operation of the assignment and sends one outcome per operation to `sink`.
    ///
    /// Failed operations do not stop the worker. It stops early only once `cancel` fires, or when
    /// nobody is receiving outcomes anymore.
    pub async fn run(
        self,
        source: &OperationSource,
        sink: &mpsc::Sender<RequestOutcome>,
        cancel: &CancellationToken,
    ) -> WorkerReport {
        let mut executed = 0;

        for (index, op) in source.range(self.assignment.range()) {
            if cancel.is_cancelled() {
                tracing::debug!(worker = self.assignment.worker, index, "worker cancelled");
                break;
            }

            let outcome = self.client.execute(index, &op).await;
            if sink.send(outcome).await.is_err() {
                tracing::warn!(
                    worker = self.assignment.worker,
                    "outcome receiver dropped, stopping worker"
                );
                break;
            }
            executed += 1;
        }

        WorkerReport {
            assignment: self.assignment,
            executed,
        }
    }
}

/// Starts one worker per assignment and returns a handle to their outcomes.
///
/// `make_client` is called once per worker. Workers stop taking new operations once `cancel`
/// fires. Must be called within a tokio runtime.
pub fn dispatch<R, F>(
    source: &OperationSource,
    worker_count: NonZeroUsize,
    mut make_client: F,
    cancel: CancellationToken,
) -> Dispatch
where
    R: Remote + 'static,
    F: FnMut() -> Client<R>,
{
    let assignments = partition(source.len(), worker_count);
    let capacity = CHANNEL_CAPACITY_PER_WORKER.saturating_mul(worker_count.get());
    let (sender, outcomes) = mpsc::channel(capacity);

    let workers = assignments
        .iter()
        .map(|&assignment| {
            let worker = Worker::new(assignment, make_client());
            let source = source.clone();
            let sender = sender.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { worker.run(&source, &sender, &cancel).await })
        })
        .collect();

    Dispatch {
        assignments,
        outcomes,
        workers,
    }
}

/// Handle to a running pool of workers.
#[derive(Debug)]
pub struct Dispatch {
    assignments: Vec<WorkerAssignment>,
    outcomes: mpsc::Receiver<RequestOutcome>,
    workers: Vec<JoinHandle<WorkerReport>>,
}

impl Dispatch {
    /// The assignments handed to the workers, in worker order.
    pub fn assignments(&self) -> &[WorkerAssignment] {
        &self.assignments
    }

    /// Receives the next outcome from any worker.
    ///
    /// Returns `None` once every worker has finished and all outcomes have been received.
    pub async fn next(&mut self) -> Option<RequestOutcome> {
        self.outcomes.recv().await
    }

    /// Waits for all workers to finish and returns their reports.
    ///
    /// Drain the outcomes with [`next`](Self::next) first. Outcomes that have not been received
    /// yet are discarded, and workers still running stop at their next operation.
    pub async fn join(self) -> Result<Vec<WorkerReport>> {
        let Self {
            outcomes, workers, ..
        } = self;
        drop(outcomes);

        let mut reports = Vec::with_capacity(workers.len());
        for result in futures::future::join_all(workers).await {
            reports.push(result?);
        }
        Ok(reports)
    }

    /// Receives all outcomes and joins the workers.
    pub async fn collect(mut self) -> Result<(Vec<RequestOutcome>, Vec<WorkerReport>)> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.next().await {
            outcomes.push(outcome);
        }
        let reports = self.join().await?;
        Ok((outcomes, reports))
    }
}
