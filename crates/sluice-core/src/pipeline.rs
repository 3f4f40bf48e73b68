//! Pipeline controller: wires producer, queue, workers and aggregator together.
use crate::aggregate::{AggregatedResult, ResultAggregator};
use crate::config::PipelineConfig;
use crate::context::PipelineCtx;
use crate::error::PipelineError;
use crate::fetch::Fetcher;
use crate::item::WorkItem;
use crate::metrics::{InFlightGauge, RunMetrics};
use crate::producer::{Producer, ProducerReport};
use crate::queue::BoundedQueue;
use crate::source::IdSource;
use crate::worker::{Worker, WorkerReport};
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Everything a finished run hands back to its caller.
#[derive(Debug)]
pub struct PipelineOutcome<K, V> {
    /// One entry per identifier that reached a worker.
    pub result: AggregatedResult<K, V>,
    pub metrics: RunMetrics,
    pub producer: ProducerReport,
    pub workers: Vec<WorkerReport>,
}

/// A bounded-concurrency fan-out pipeline.
///
/// # Example
///
/// ```rust
/// use sluice_core::{fetch_fn, iter_source, FetchError, Pipeline, PipelineConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let fetcher = fetch_fn(|id: u64| async move { Ok::<_, FetchError>(id * 2) });
/// let pipeline = Pipeline::new(PipelineConfig::new(5, 5), fetcher)?;
/// let outcome = pipeline.run(iter_source(0..23u64)).await?;
/// assert_eq!(outcome.result.len(), 23);
/// assert_eq!(outcome.result.value(&7), Some(&14));
/// # Ok(())
/// # }
/// ```
pub struct Pipeline<K, F> {
    config: PipelineConfig,
    fetcher: Arc<F>,
    cancel: CancellationToken,
    _item: PhantomData<fn() -> K>,
}

impl<K, F> Pipeline<K, F>
where
    K: WorkItem,
    F: Fetcher<K>,
{
    /// Create a pipeline; the configuration is validated up front.
    pub fn new(config: PipelineConfig, fetcher: F) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            config,
            fetcher: Arc::new(fetcher),
            cancel: CancellationToken::new(),
            _item: PhantomData,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Token that cancels the run started with [`Pipeline::run`].
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the pipeline to completion over `source`.
    ///
    /// A pipeline performs a single run, so at most `workers` fetches are ever
    /// in flight against its fetcher. Wrap the fetcher in an `Arc` to reuse it
    /// across pipelines; runs of different pipelines are capped independently.
    pub async fn run<S>(self, source: S) -> Result<PipelineOutcome<K, F::Value>, PipelineError>
    where
        S: IdSource<K> + 'static,
    {
        let cancel = self.cancel.clone();
        self.run_with_cancel(source, cancel).await
    }

    /// Run the pipeline, stopping early once `cancel` fires.
    ///
    /// Returns only after the producer and every worker have terminated. On
    /// cancellation the aggregate still accounts for every enqueued item.
    #[tracing::instrument(name = "pipeline", skip_all, fields(workers = self.config.workers, capacity = self.config.queue_capacity))]
    pub async fn run_with_cancel<S>(
        self,
        source: S,
        cancel: CancellationToken,
    ) -> Result<PipelineOutcome<K, F::Value>, PipelineError>
    where
        S: IdSource<K> + 'static,
    {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        info!(%run_id, "pipeline starting");

        let queue = BoundedQueue::new(self.config.queue_capacity);
        let aggregator = ResultAggregator::new();
        let gauge = Arc::new(InFlightGauge::default());
        // A failing worker cancels the run through this child, never the caller's token.
        let run_cancel = cancel.child_token();
        let ctx = PipelineCtx::new(run_cancel.clone()).with_fetch_timeout(self.config.fetch_timeout);

        let producer = tokio::spawn(Producer::new(source, queue.clone(), run_cancel.clone()).run());
        let mut workers: FuturesUnordered<JoinHandle<WorkerReport>> = (0..self.config.workers)
            .map(|worker_id| {
                let worker = Worker::new(
                    worker_id,
                    queue.clone(),
                    Arc::clone(&self.fetcher),
                    aggregator.clone(),
                    ctx.clone(),
                    self.config.retry.clone(),
                    Arc::clone(&gauge),
                );
                tokio::spawn(worker.run())
            })
            .collect();

        // Producer and pool are joined concurrently. A dead worker cancels the
        // run, which releases a producer blocked on a full queue.
        let join_producer = async {
            match producer.await {
                Ok(report) => Ok(report),
                Err(e) => {
                    error!(error = %e, "producer task failed");
                    let _ = queue.mark_complete().await;
                    Err(e)
                }
            }
        };
        let join_workers = async {
            let mut reports = Vec::with_capacity(self.config.workers);
            let mut failure = None;
            while let Some(joined) = workers.next().await {
                match joined {
                    Ok(report) => reports.push(report),
                    Err(e) => {
                        error!(error = %e, "worker task failed, cancelling run");
                        run_cancel.cancel();
                        if failure.is_none() {
                            failure = Some(e);
                        }
                    }
                }
            }
            match failure {
                Some(e) => Err(e),
                None => Ok(reports),
            }
        };
        let (producer, workers) = tokio::join!(join_producer, join_workers);
        let producer = producer?;
        let mut workers = workers?;
        workers.sort_by_key(|w| w.worker_id);

        let result = aggregator.finish().await;
        let metrics = RunMetrics {
            run_id,
            started_at,
            finished_at: Utc::now(),
            workers: self.config.workers,
            queue_capacity: self.config.queue_capacity,
            enqueued: producer.enqueued,
            succeeded: result.success_count(),
            failed: result.failure_count(),
            retries: workers.iter().map(|w| w.retries).sum(),
            blocked_puts: queue.blocked_puts(),
            peak_in_flight: gauge.peak(),
            duplicates: result.duplicate_count(),
            cancelled: producer.cancelled || ctx.is_cancelled(),
            upstream_error: producer.upstream_error.as_ref().map(ToString::to_string),
        };
        info!(
            run_id = %metrics.run_id,
            enqueued = metrics.enqueued,
            succeeded = metrics.succeeded,
            failed = metrics.failed,
            retries = metrics.retries,
            cancelled = metrics.cancelled,
            "pipeline finished"
        );
        Ok(PipelineOutcome {
            result,
            metrics,
            producer,
            workers,
        })
    }
}
