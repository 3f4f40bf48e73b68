//! The external fetch capability invoked once per attempt by the workers.
use crate::item::WorkItem;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Classified failure returned by a [`Fetcher`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Worth retrying: rate limiting, connection resets and the like.
    #[error("transient fetch failure: {0}")]
    Transient(String),
    /// The dependency refused the request for good.
    #[error("permanent fetch failure: {0}")]
    Permanent(String),
    /// The dependency answered with something that could not be interpreted.
    #[error("malformed fetch response: {0}")]
    Malformed(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

/// A rate-sensitive external lookup, keyed by work item.
///
/// Implementations must be shareable across the worker pool; the pool caps the
/// number of concurrent calls, so implementations need no limiter of their own.
#[async_trait]
pub trait Fetcher<K: WorkItem>: Send + Sync + 'static {
    /// Value produced for a successfully fetched item.
    type Value: Send + 'static;

    /// Fetch the value for `id`.
    async fn fetch(&self, id: &K) -> Result<Self::Value, FetchError>;
}

/// Shared fetchers, so one client can back several pipelines.
#[async_trait]
impl<K, T> Fetcher<K> for Arc<T>
where
    K: WorkItem,
    T: Fetcher<K>,
{
    type Value = T::Value;

    async fn fetch(&self, id: &K) -> Result<T::Value, FetchError> {
        (**self).fetch(id).await
    }
}

/// Adapter turning an async closure into a [`Fetcher`].
#[derive(Clone, Debug)]
pub struct FnFetcher<F> {
    f: F,
}

/// Wrap a closure `Fn(K) -> impl Future<Output = Result<V, FetchError>>`.
///
/// # Example
///
/// ```rust
/// use sluice_core::{fetch_fn, FetchError};
///
/// let doubler = fetch_fn(|id: u64| async move { Ok::<_, FetchError>(id * 2) });
/// ```
pub fn fetch_fn<F>(f: F) -> FnFetcher<F> {
    FnFetcher { f }
}

#[async_trait]
impl<K, V, F, Fut> Fetcher<K> for FnFetcher<F>
where
    K: WorkItem,
    V: Send + 'static,
    F: Fn(K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, FetchError>> + Send,
{
    type Value = V;

    async fn fetch(&self, id: &K) -> Result<V, FetchError> {
        (self.f)(id.clone()).await
    }
}
