//! Core of sluice: a bounded-concurrency fan-out pipeline.
//!
//! A single producer pulls identifiers from an [`IdSource`] into a
//! [`BoundedQueue`]; a fixed pool of workers takes them, calls a rate-limited
//! [`Fetcher`] per item, and records one [`ResultEntry`] per identifier in a
//! shared [`ResultAggregator`]. The [`Pipeline`] controller joins everything and
//! returns the [`AggregatedResult`].
pub mod aggregate;
pub mod config;
pub mod context;
pub mod error;
pub mod fetch;
pub mod item;
pub mod metrics;
pub mod pipeline;
pub mod producer;
pub mod queue;
pub mod retry;
pub mod source;
pub mod worker;

pub use aggregate::{AggregateError, AggregatedResult, FailureKind, FetchFailure, ResultAggregator, ResultEntry};
pub use config::{ConfigError, PipelineConfig};
pub use context::{AttemptError, PipelineCtx};
pub use error::PipelineError;
pub use fetch::{fetch_fn, FetchError, Fetcher, FnFetcher};
pub use item::WorkItem;
pub use metrics::{InFlightGauge, RunMetrics};
pub use pipeline::{Pipeline, PipelineOutcome};
pub use producer::{Producer, ProducerReport};
pub use queue::{BoundedQueue, QueueError};
pub use retry::{BackoffStrategy, Jitter, RetryOn, RetryPolicy};
pub use source::{iter_source, source, ChannelSource, IdSource, IterSource, PacedSource, SourceError, StreamSource};
pub use worker::{Worker, WorkerReport};

pub use tokio_util::sync::CancellationToken;
