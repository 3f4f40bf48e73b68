//! Upstream identifier sources consumed by the producer.
//!
//! A source is a lazy, finite, non-restartable sequence of identifiers. It may
//! be paced (pagination, slow upstream) and it may fail part-way; the producer
//! treats a failure as the end of the sequence.
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Failure of the upstream identifier source.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("upstream source failed: {0}")]
    Upstream(String),
    #[error("upstream source timed out after {0:?}")]
    Timeout(Duration),
}

/// A lazily enumerated sequence of identifiers.
#[async_trait]
pub trait IdSource<K>: Send {
    /// Pull the next identifier. `Ok(None)` means the source is exhausted.
    async fn next(&mut self) -> Result<Option<K>, SourceError>;
}

// -----------------------------------------------------------------------------
/// Source backed by an in-memory iterator of `Result`s.
///
/// After the first `Err` the source reports exhaustion.
#[derive(Debug, Clone)]
pub struct IterSource<I> {
    iter: I,
    failed: bool,
}

impl<I> IterSource<I> {
    /// Wrap an iterator whose items may already carry upstream failures.
    pub fn fallible(iter: I) -> Self {
        Self {
            iter,
            failed: false,
        }
    }
}

/// Build a source from any collection of identifiers.
pub fn iter_source<K, I>(
    items: I,
) -> IterSource<impl Iterator<Item = Result<K, SourceError>> + Send>
where
    I: IntoIterator<Item = K>,
    I::IntoIter: Send,
{
    IterSource::fallible(items.into_iter().map(Ok))
}

#[async_trait]
impl<K, I> IdSource<K> for IterSource<I>
where
    K: Send,
    I: Iterator<Item = Result<K, SourceError>> + Send,
{
    async fn next(&mut self) -> Result<Option<K>, SourceError> {
        if self.failed {
            return Ok(None);
        }
        match self.iter.next() {
            Some(Ok(id)) => Ok(Some(id)),
            Some(Err(e)) => {
                self.failed = true;
                Err(e)
            }
            None => Ok(None),
        }
    }
}

// -----------------------------------------------------------------------------
/// A channel source: external code sends identifiers in, and the source ends
/// once every sender is dropped.
#[derive(Debug)]
pub struct ChannelSource<K> {
    receiver: mpsc::Receiver<K>,
}

impl<K> ChannelSource<K> {
    /// Wrap an existing receiver into a source.
    pub fn new(receiver: mpsc::Receiver<K>) -> Self {
        Self { receiver }
    }
}

#[async_trait]
impl<K: Send> IdSource<K> for ChannelSource<K> {
    async fn next(&mut self) -> Result<Option<K>, SourceError> {
        Ok(self.receiver.recv().await)
    }
}

/// Create a channel-backed source and its sender handle.
///
/// `capacity` sets the mpsc buffer size. Returns `(sender, source)`.
pub fn source<K: Send>(capacity: usize) -> (mpsc::Sender<K>, ChannelSource<K>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (tx, ChannelSource::new(rx))
}

// -----------------------------------------------------------------------------
/// Adapts a `Stream` of fallible identifiers.
pub struct StreamSource<S> {
    stream: S,
}

impl<S> StreamSource<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl<K, S> IdSource<K> for StreamSource<S>
where
    K: Send,
    S: Stream<Item = Result<K, SourceError>> + Unpin + Send,
{
    async fn next(&mut self) -> Result<Option<K>, SourceError> {
        self.stream.next().await.transpose()
    }
}

// -----------------------------------------------------------------------------
/// Wraps another source and waits a fixed interval before every pull.
///
/// Models a slow or paginated upstream.
#[derive(Debug, Clone)]
pub struct PacedSource<S> {
    inner: S,
    interval: Duration,
}

impl<S> PacedSource<S> {
    pub fn new(inner: S, interval: Duration) -> Self {
        Self { inner, interval }
    }
}

#[async_trait]
impl<K, S> IdSource<K> for PacedSource<S>
where
    K: Send,
    S: IdSource<K>,
{
    async fn next(&mut self) -> Result<Option<K>, SourceError> {
        tokio::time::sleep(self.interval).await;
        self.inner.next().await
    }
}
