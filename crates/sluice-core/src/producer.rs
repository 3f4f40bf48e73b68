//! The single producer feeding the bounded queue from an upstream source.
use crate::item::WorkItem;
use crate::queue::{BoundedQueue, QueueError};
use crate::source::{IdSource, SourceError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// What the producer did before marking the queue complete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProducerReport {
    /// Items successfully enqueued.
    pub enqueued: usize,
    /// Set if the upstream source failed part-way.
    pub upstream_error: Option<SourceError>,
    /// Set if the producer stopped because the run was cancelled.
    pub cancelled: bool,
    /// Contract violation reported by the queue, if any.
    pub queue_error: Option<QueueError>,
}

/// Pulls identifiers from a source and enqueues them in source order.
pub struct Producer<S, K> {
    source: S,
    queue: BoundedQueue<K>,
    cancel: CancellationToken,
}

impl<S, K> Producer<S, K>
where
    S: IdSource<K>,
    K: WorkItem,
{
    pub fn new(source: S, queue: BoundedQueue<K>, cancel: CancellationToken) -> Self {
        Self {
            source,
            queue,
            cancel,
        }
    }

    /// Drain the source into the queue, then mark the queue complete.
    ///
    /// Completion is marked on every exit path: exhaustion, upstream failure
    /// and cancellation alike, so consumers are never left waiting.
    #[tracing::instrument(name = "producer", skip(self))]
    pub async fn run(mut self) -> ProducerReport {
        let mut report = ProducerReport::default();
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                next = self.source.next() => next,
            };
            let id = match next {
                Ok(Some(id)) => id,
                Ok(None) => break,
                Err(e) => {
                    warn!(enqueued = report.enqueued, error = %e, "upstream source failed, stopping enumeration");
                    report.upstream_error = Some(e);
                    break;
                }
            };
            debug!(item = %id, "enqueueing");
            let put = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                put = self.queue.put(id) => put,
            };
            if let Err(e) = put {
                error!(error = %e, "queue rejected item");
                report.queue_error = Some(e);
                break;
            }
            report.enqueued += 1;
        }
        if let Err(e) = self.queue.mark_complete().await {
            error!(error = %e, "queue completion was already marked");
            if report.queue_error.is_none() {
                report.queue_error = Some(e);
            }
        }
        debug!(enqueued = report.enqueued, cancelled = report.cancelled, "producer finished");
        report
    }
}
