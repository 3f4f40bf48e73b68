//! Run metrics and the in-flight fetch gauge.
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Summary of a finished pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct RunMetrics {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub workers: usize,
    pub queue_capacity: usize,
    /// Items the producer managed to enqueue.
    pub enqueued: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub retries: usize,
    /// `put` calls that waited on a full queue.
    pub blocked_puts: usize,
    /// Highest number of fetch calls observed in flight at once.
    pub peak_in_flight: usize,
    pub duplicates: usize,
    pub cancelled: bool,
    pub upstream_error: Option<String>,
}

impl RunMetrics {
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Counts concurrent fetch calls and remembers the peak.
#[derive(Debug, Default)]
pub struct InFlightGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlightGauge {
    /// Mark a call as started; the call ends when the guard drops.
    pub fn enter(&self) -> InFlightGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlightGuard { gauge: self }
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub struct InFlightGuard<'a> {
    gauge: &'a InFlightGauge,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.gauge.current.fetch_sub(1, Ordering::SeqCst);
    }
}
