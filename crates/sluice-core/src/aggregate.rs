//! Keyed result set written concurrently by the worker pool.
//!
//! Each identifier is dequeued by exactly one worker, so every key has a single
//! writer by construction. A second write for the same key means the upstream
//! source emitted a duplicate; it is rejected, logged and counted.
use crate::item::WorkItem;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Classification of a terminal per-item failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transient,
    Permanent,
    Malformed,
    Timeout,
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Transient => "transient",
            FailureKind::Permanent => "permanent",
            FailureKind::Malformed => "malformed",
            FailureKind::Timeout => "timeout",
            FailureKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Failure marker recorded for an item whose fetch never succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchFailure {
    pub kind: FailureKind,
    pub message: String,
    /// Fetch attempts made before giving up; zero if the item was never fetched.
    pub attempts: usize,
}

/// Terminal outcome for one identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultEntry<V> {
    Success(V),
    Failure(FetchFailure),
}

impl<V> ResultEntry<V> {
    pub fn is_success(&self) -> bool {
        matches!(self, ResultEntry::Success(_))
    }

    pub fn value(&self) -> Option<&V> {
        match self {
            ResultEntry::Success(v) => Some(v),
            ResultEntry::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&FetchFailure> {
        match self {
            ResultEntry::Success(_) => None,
            ResultEntry::Failure(f) => Some(f),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AggregateError {
    #[error("duplicate result for item {0}")]
    DuplicateKey(String),
}

/// Internally synchronized identifier → entry map shared by all workers.
pub struct ResultAggregator<K, V> {
    entries: Arc<Mutex<HashMap<K, ResultEntry<V>>>>,
    duplicates: Arc<AtomicUsize>,
}

impl<K, V> Clone for ResultAggregator<K, V> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            duplicates: Arc::clone(&self.duplicates),
        }
    }
}

impl<K: WorkItem, V: Send> Default for ResultAggregator<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: WorkItem, V: Send> ResultAggregator<K, V> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            duplicates: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Record the terminal entry for `id`.
    ///
    /// The first entry for a key wins; later ones are rejected.
    pub async fn insert(&self, id: K, entry: ResultEntry<V>) -> Result<(), AggregateError> {
        let mut map = self.entries.lock().await;
        if map.contains_key(&id) {
            drop(map);
            self.duplicates.fetch_add(1, Ordering::Relaxed);
            tracing::error!(item = %id, "duplicate result entry rejected");
            return Err(AggregateError::DuplicateKey(id.instance_id()));
        }
        map.insert(id, entry);
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Take the accumulated entries as a read-only result.
    ///
    /// Intended to be called once every writer has finished.
    pub async fn finish(&self) -> AggregatedResult<K, V> {
        let entries = std::mem::take(&mut *self.entries.lock().await);
        AggregatedResult {
            entries,
            duplicates: self.duplicates.load(Ordering::Relaxed),
        }
    }
}

/// Final, read-only view of a pipeline run.
#[derive(Debug, Clone)]
pub struct AggregatedResult<K, V> {
    entries: HashMap<K, ResultEntry<V>>,
    duplicates: usize,
}

impl<K: WorkItem, V> AggregatedResult<K, V> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &K) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &K) -> Option<&ResultEntry<V>> {
        self.entries.get(id)
    }

    /// Fetched value for `id`, if the item succeeded.
    pub fn value(&self, id: &K) -> Option<&V> {
        self.get(id).and_then(ResultEntry::value)
    }

    /// `Some(true)` for a success, `Some(false)` for a failure, `None` if unknown.
    pub fn is_success(&self, id: &K) -> Option<bool> {
        self.get(id).map(ResultEntry::is_success)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &ResultEntry<V>)> {
        self.entries.iter()
    }

    pub fn successes(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries
            .iter()
            .filter_map(|(k, e)| e.value().map(|v| (k, v)))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&K, &FetchFailure)> {
        self.entries
            .iter()
            .filter_map(|(k, e)| e.failure().map(|f| (k, f)))
    }

    pub fn success_count(&self) -> usize {
        self.successes().count()
    }

    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }

    /// Duplicate writes rejected during the run.
    pub fn duplicate_count(&self) -> usize {
        self.duplicates
    }

    pub fn into_inner(self) -> HashMap<K, ResultEntry<V>> {
        self.entries
    }
}
