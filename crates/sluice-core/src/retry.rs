//! Retry policy applied by workers to failed fetch attempts.
//!
//! Only transient failures and timeouts are ever retried. Permanent failures,
//! malformed responses and cancellation end the item on the first occurrence.
use crate::aggregate::FailureKind;
use crate::config::duration_ms;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Strategy for computing backoff durations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Delay = initial_backoff * attempt_count
    Linear,
    /// Delay = initial_backoff * 2^(attempt_count - 1)
    Exponential,
}

/// Which retryable failures should actually be retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryOn {
    /// Transient errors and timeouts.
    All,
    /// Transient errors only.
    Transient,
    /// Timeouts only.
    Timeout,
    /// Never retry; every failure is final.
    Never,
}

/// Extra delay added on top of the computed backoff.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Jitter {
    /// Always add exactly this much.
    Fixed(#[serde(with = "duration_ms")] Duration),
    /// Add a uniformly random delay in `0..=max`.
    Random(#[serde(with = "duration_ms")] Duration),
}

/// Policy controlling retry behavior for fetch attempts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: usize,
    /// Initial backoff duration between retries.
    #[serde(rename = "initial_backoff_ms", with = "duration_ms")]
    pub initial_backoff: Duration,
    /// Maximum backoff duration allowed.
    #[serde(rename = "max_backoff_ms", with = "duration_ms")]
    pub max_backoff: Duration,
    /// Strategy to compute backoff durations.
    pub strategy: BackoffStrategy,
    /// Optional jitter added to each backoff.
    #[serde(default)]
    pub jitter: Option<Jitter>,
    /// Predicate controlling which failures to retry.
    pub retry_on: RetryOn,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::new(
            3,
            Duration::from_millis(50),
            Duration::from_secs(2),
            BackoffStrategy::Exponential,
            RetryOn::All,
        )
    }
}

impl RetryPolicy {
    /// Construct a new RetryPolicy.
    pub fn new(
        max_attempts: usize,
        initial_backoff: Duration,
        max_backoff: Duration,
        strategy: BackoffStrategy,
        retry_on: RetryOn,
    ) -> Self {
        RetryPolicy {
            max_attempts,
            initial_backoff,
            max_backoff,
            strategy,
            jitter: None,
            retry_on,
        }
    }

    /// A policy that makes a single attempt.
    pub fn no_retry() -> Self {
        RetryPolicy::new(
            1,
            Duration::ZERO,
            Duration::ZERO,
            BackoffStrategy::Linear,
            RetryOn::Never,
        )
    }

    /// Specify a fixed jitter offset to add to each backoff.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = Some(Jitter::Fixed(jitter));
        self
    }

    /// Add a random delay of up to `max` to each backoff.
    pub fn with_random_jitter(mut self, max: Duration) -> Self {
        self.jitter = Some(Jitter::Random(max));
        self
    }

    /// Determine whether a failure should be retried after the given attempt (1-based).
    pub fn should_retry(&self, kind: FailureKind, attempt: usize) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        match self.retry_on {
            RetryOn::All => matches!(kind, FailureKind::Transient | FailureKind::Timeout),
            RetryOn::Transient => kind == FailureKind::Transient,
            RetryOn::Timeout => kind == FailureKind::Timeout,
            RetryOn::Never => false,
        }
    }

    /// Compute the backoff duration before the next retry given the attempt count (1-based).
    pub fn backoff_duration(&self, attempt: usize) -> Duration {
        let base = match self.strategy {
            BackoffStrategy::Linear => {
                let factor = u32::try_from(attempt).unwrap_or(u32::MAX);
                self.initial_backoff.saturating_mul(factor)
            }
            BackoffStrategy::Exponential => {
                // Compute 2^(attempt-1) with shift, saturating at 32 bits
                let exp = attempt.saturating_sub(1);
                let factor = if exp < 32 { 1_u32 << exp } else { u32::MAX };
                self.initial_backoff.saturating_mul(factor)
            }
        };
        let capped = base.min(self.max_backoff);
        match self.jitter {
            Some(Jitter::Fixed(j)) => capped.saturating_add(j),
            Some(Jitter::Random(max)) => {
                let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
                let extra = rand::thread_rng().gen_range(0..=max_ms);
                capped.saturating_add(Duration::from_millis(extra))
            }
            None => capped,
        }
    }
}
