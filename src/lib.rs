//! # Sluice - bounded-concurrency fan-out for rate-limited fetches
//!
//! A single producer feeds identifiers into a bounded queue; a fixed pool of
//! workers fetches each one from a rate-limited dependency and the results are
//! gathered into one keyed set. The queue gives backpressure, the pool size
//! caps concurrent outbound calls, and an explicit completion signal keeps
//! workers alive until the producer is done and the backlog is drained.
//!
//! ## Usage
//!
//! ```rust
//! use sluice::core::{fetch_fn, iter_source, FetchError, Pipeline, PipelineConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let fetcher = fetch_fn(|id: u64| async move { Ok::<_, FetchError>(id * 2) });
//! let pipeline = Pipeline::new(PipelineConfig::new(5, 10), fetcher)?;
//! let outcome = pipeline.run(iter_source(0..100u64)).await?;
//! assert_eq!(outcome.result.success_count(), 100);
//! # Ok(())
//! # }
//! ```

/// Initialize logging with default settings.
///
/// Installs the `tracing` fmt subscriber; call once at program start.
pub fn init() {
    tracing_subscriber::fmt::init();
}

// Re-export the core crate
pub use sluice_core as core;

pub use sluice_core::{
    fetch_fn, iter_source, AggregatedResult, FetchError, Fetcher, IdSource, Pipeline,
    PipelineConfig, PipelineError, PipelineOutcome, ResultEntry, RetryPolicy,
};
