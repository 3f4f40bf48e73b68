#![allow(dead_code)]

use async_trait::async_trait;
use sluice_core::{FetchError, Fetcher};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, Once};
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt().with_env_filter(filter).with_test_writer().init();
    });
}

/// Fetcher returning `id * 2` that records how many calls overlap.
#[derive(Default)]
pub struct ProbeFetcher {
    current: AtomicUsize,
    max_seen: AtomicUsize,
    calls: AtomicUsize,
    delay: Duration,
    permanent: HashSet<u64>,
}

impl ProbeFetcher {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Ids for which the fetch fails permanently.
    pub fn failing_for(mut self, ids: impl IntoIterator<Item = u64>) -> Self {
        self.permanent = ids.into_iter().collect();
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_seen.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher<u64> for ProbeFetcher {
    type Value = u64;

    async fn fetch(&self, id: &u64) -> Result<u64, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.current.fetch_sub(1, Ordering::SeqCst);
        if self.permanent.contains(id) {
            return Err(FetchError::Permanent(format!("no such item {id}")));
        }
        Ok(id * 2)
    }
}

/// Fetcher that fails the first `fail_first` attempts of every item.
pub struct FlakyFetcher {
    fail_first: usize,
    attempts: Mutex<HashMap<u64, usize>>,
}

impl FlakyFetcher {
    pub fn new(fail_first: usize) -> Self {
        Self {
            fail_first,
            attempts: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Fetcher<u64> for FlakyFetcher {
    type Value = u64;

    async fn fetch(&self, id: &u64) -> Result<u64, FetchError> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let n = attempts.entry(*id).or_insert(0);
            *n += 1;
            *n
        };
        // Yield so other workers interleave between attempts.
        tokio::task::yield_now().await;
        if attempt <= self.fail_first {
            Err(FetchError::Transient(format!("attempt {attempt} throttled")))
        } else {
            Ok(*id)
        }
    }
}
