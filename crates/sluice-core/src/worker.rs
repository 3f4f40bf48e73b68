//! Pool workers: take an item, fetch it with retries, record one terminal entry.
use crate::aggregate::{FailureKind, FetchFailure, ResultAggregator, ResultEntry};
use crate::context::{AttemptError, PipelineCtx};
use crate::fetch::Fetcher;
use crate::item::WorkItem;
use crate::metrics::InFlightGauge;
use crate::queue::BoundedQueue;
use crate::retry::RetryPolicy;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Per-worker tallies, returned when the worker observes the end of the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker_id: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub retries: usize,
}

/// One member of the worker pool.
///
/// Workers never talk to each other; the queue hands each item to exactly one
/// worker and the aggregator collects what they produce.
pub struct Worker<K, F>
where
    K: WorkItem,
    F: Fetcher<K>,
{
    id: usize,
    queue: BoundedQueue<K>,
    fetcher: Arc<F>,
    aggregator: ResultAggregator<K, F::Value>,
    ctx: PipelineCtx,
    policy: RetryPolicy,
    gauge: Arc<InFlightGauge>,
}

impl<K, F> Worker<K, F>
where
    K: WorkItem,
    F: Fetcher<K>,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        queue: BoundedQueue<K>,
        fetcher: Arc<F>,
        aggregator: ResultAggregator<K, F::Value>,
        ctx: PipelineCtx,
        policy: RetryPolicy,
        gauge: Arc<InFlightGauge>,
    ) -> Self {
        Self {
            id,
            queue,
            fetcher,
            aggregator,
            ctx,
            policy,
            gauge,
        }
    }

    /// Process items until the queue is complete and drained.
    ///
    /// Once the run is cancelled, remaining items are still taken off the queue
    /// but recorded as `Cancelled` failures without calling the fetcher.
    #[tracing::instrument(name = "worker", skip(self), fields(worker_id = self.id))]
    pub async fn run(self) -> WorkerReport {
        let mut report = WorkerReport {
            worker_id: self.id,
            ..WorkerReport::default()
        };
        while let Some(id) = self.queue.try_take().await {
            let entry = if self.ctx.is_cancelled() {
                ResultEntry::Failure(FetchFailure {
                    kind: FailureKind::Cancelled,
                    message: AttemptError::Cancelled.to_string(),
                    attempts: 0,
                })
            } else {
                self.process(&id, &mut report).await
            };
            report.processed += 1;
            if entry.is_success() {
                report.succeeded += 1;
            } else {
                report.failed += 1;
            }
            if let Err(e) = self.aggregator.insert(id, entry).await {
                error!(error = %e, "result entry was not recorded");
            }
        }
        debug!(processed = report.processed, "queue drained, worker exiting");
        report
    }

    /// Fetch one item, applying the retry policy, and return its terminal entry.
    async fn process(&self, id: &K, report: &mut WorkerReport) -> ResultEntry<F::Value> {
        let mut attempt = 1;
        loop {
            let outcome = {
                let _in_flight = self.gauge.enter();
                self.ctx.run_fetch(self.fetcher.fetch(id)).await
            };
            let err = match outcome {
                Ok(value) => {
                    debug!(item = %id, attempt, "fetched");
                    return ResultEntry::Success(value);
                }
                Err(err) => err,
            };
            let kind = err.kind();
            debug!(item = %id, attempt, error = %err, "fetch attempt failed, evaluating retry policy");
            if self.policy.should_retry(kind, attempt) {
                let backoff = self.policy.backoff_duration(attempt);
                debug!(item = %id, attempt, backoff = ?backoff, "retrying after backoff");
                report.retries += 1;
                if let Err(cancelled) = self.ctx.wait(backoff).await {
                    return failure(cancelled, attempt);
                }
                attempt += 1;
                continue;
            }
            if kind != FailureKind::Cancelled {
                warn!(item = %id, attempt, error = %err, "giving up on item");
            }
            return failure(err, attempt);
        }
    }
}

fn failure<V>(err: AttemptError, attempts: usize) -> ResultEntry<V> {
    ResultEntry::Failure(FetchFailure {
        kind: err.kind(),
        message: err.to_string(),
        attempts,
    })
}
