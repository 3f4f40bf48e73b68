use crate::aggregate::FailureKind;
use crate::fetch::FetchError;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Why a single fetch attempt did not produce a value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AttemptError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("pipeline cancelled")]
    Cancelled,
}

impl AttemptError {
    pub fn kind(&self) -> FailureKind {
        match self {
            AttemptError::Fetch(FetchError::Transient(_)) => FailureKind::Transient,
            AttemptError::Fetch(FetchError::Permanent(_)) => FailureKind::Permanent,
            AttemptError::Fetch(FetchError::Malformed(_)) => FailureKind::Malformed,
            AttemptError::Timeout(_) => FailureKind::Timeout,
            AttemptError::Cancelled => FailureKind::Cancelled,
        }
    }
}

/// Per-run execution context shared by the producer and every worker.
///
/// Carries the cancellation token and the per-call fetch timeout.
#[derive(Clone, Debug)]
pub struct PipelineCtx {
    cancel: CancellationToken,
    fetch_timeout: Option<Duration>,
}

impl PipelineCtx {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            fetch_timeout: None,
        }
    }

    pub fn with_fetch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout
    }

    /// Cancel the run.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns true if the run has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Runs one fetch attempt, respecting cancellation and the per-call timeout.
    pub async fn run_fetch<R, F>(&self, fut: F) -> Result<R, AttemptError>
    where
        F: Future<Output = Result<R, FetchError>>,
    {
        if let Some(duration) = self.fetch_timeout {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(AttemptError::Cancelled),
                _ = tokio::time::sleep(duration) => Err(AttemptError::Timeout(duration)),
                res = fut => res.map_err(AttemptError::from),
            }
        } else {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(AttemptError::Cancelled),
                res = fut => res.map_err(AttemptError::from),
            }
        }
    }

    /// Wait out a retry backoff; returns early with `Cancelled` if the run is cancelled.
    pub async fn wait(&self, dur: Duration) -> Result<(), AttemptError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AttemptError::Cancelled),
            _ = tokio::time::sleep(dur) => Ok(()),
        }
    }
}
