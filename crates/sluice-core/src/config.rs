//! Tunable configuration for a pipeline run.

use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("worker count must be at least 1")]
    NoWorkers,
    #[error("queue capacity must be at least 1")]
    NoCapacity,
    #[error("queue capacity {capacity} is smaller than the worker count {workers}")]
    CapacityBelowWorkers { capacity: usize, workers: usize },
    #[error("retry policy must allow at least one attempt")]
    NoAttempts,
    #[error("initial backoff {initial:?} exceeds max backoff {max:?}")]
    BackoffRange { initial: Duration, max: Duration },
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Configuration for a pipeline run.
///
/// `workers` caps concurrent calls to the rate-limited dependency;
/// `queue_capacity` bounds how far the producer may run ahead of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum number of queued, not yet taken items.
    pub queue_capacity: usize,
    /// Number of concurrent workers.
    pub workers: usize,
    /// Per-call fetch timeout; `None` waits indefinitely.
    #[serde(rename = "fetch_timeout_ms", with = "duration_ms::option")]
    pub fetch_timeout: Option<Duration>,
    /// Retry policy for failed fetch attempts.
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10,
            workers: 5,
            fetch_timeout: Some(Duration::from_secs(5)),
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Create a configuration with `workers` workers and a queue of `queue_capacity`.
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        Self {
            workers,
            queue_capacity,
            ..Self::default()
        }
    }

    /// Parse a JSON configuration and validate it.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    pub fn without_fetch_timeout(mut self) -> Self {
        self.fetch_timeout = None;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::NoCapacity);
        }
        if self.queue_capacity < self.workers {
            return Err(ConfigError::CapacityBelowWorkers {
                capacity: self.queue_capacity,
                workers: self.workers,
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::NoAttempts);
        }
        if self.retry.initial_backoff > self.retry.max_backoff {
            return Err(ConfigError::BackoffRange {
                initial: self.retry.initial_backoff,
                max: self.retry.max_backoff,
            });
        }
        Ok(())
    }
}

/// Serde helpers storing durations as whole milliseconds.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
            match d {
                Some(d) => super::serialize(d, s),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
            Option::<u64>::deserialize(d).map(|ms| ms.map(Duration::from_millis))
        }
    }
}
