use crate::config::ConfigError;
use thiserror::Error;

/// Errors that prevent a pipeline run from returning its aggregate.
///
/// Per-item fetch failures and upstream failures are never reported here; they
/// end up in the aggregated result and the run metrics instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid pipeline configuration: {0}")]
    Config(#[from] ConfigError),
    /// A producer or worker task panicked or was aborted.
    #[error("pipeline task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
