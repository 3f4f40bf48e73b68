mod helpers;

use helpers::{FlakyFetcher, ProbeFetcher};
use sluice_core::{
    fetch_fn, iter_source, source, BackoffStrategy, FailureKind, FetchError, IterSource,
    PacedSource, Pipeline, PipelineConfig, PipelineError, RetryOn, RetryPolicy, SourceError,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn fast_retry(max_attempts: usize) -> RetryPolicy {
    RetryPolicy::new(
        max_attempts,
        Duration::from_millis(1),
        Duration::from_millis(5),
        BackoffStrategy::Exponential,
        RetryOn::All,
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_doubles_twenty_three_items() {
    helpers::init_tracing();
    let fetcher = fetch_fn(|id: u64| async move { Ok::<_, FetchError>(id * 2) });
    let pipeline = Pipeline::new(PipelineConfig::new(5, 5), fetcher).expect("valid config");

    let outcome = pipeline.run(iter_source(0..23u64)).await.expect("run");

    assert_eq!(outcome.result.len(), 23);
    assert_eq!(outcome.result.value(&7), Some(&14));
    for id in 0..23u64 {
        assert_eq!(outcome.result.value(&id), Some(&(id * 2)), "missing {id}");
    }
    assert_eq!(outcome.metrics.enqueued, 23);
    assert_eq!(outcome.metrics.succeeded, 23);
    assert_eq!(outcome.metrics.failed, 0);
    assert_eq!(outcome.workers.len(), 5);
    assert_eq!(outcome.workers.iter().map(|w| w.processed).sum::<usize>(), 23);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_permanent_failures_are_recorded() {
    helpers::init_tracing();
    let fetcher = ProbeFetcher::new(Duration::ZERO).failing_for([3, 7]);
    let config = PipelineConfig::new(5, 5).with_retry_policy(fast_retry(3));
    let pipeline = Pipeline::new(config, fetcher).expect("valid config");

    let outcome = pipeline.run(iter_source(0..10u64)).await.expect("run");
    let result = &outcome.result;

    assert_eq!(result.len(), 10);
    assert_eq!(result.failure_count(), 2);
    assert_eq!(result.success_count(), 8);
    for id in [3u64, 7] {
        let failure = result.get(&id).and_then(|e| e.failure()).expect("failure entry");
        assert_eq!(failure.kind, FailureKind::Permanent);
        // permanent failures are never retried
        assert_eq!(failure.attempts, 1);
    }
    assert_eq!(outcome.metrics.retries, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_upstream_failure_still_completes() {
    helpers::init_tracing();
    let items = (0..10u64).map(|i| {
        if i < 4 {
            Ok(i)
        } else {
            Err(SourceError::Upstream(format!("page fetch failed at {i}")))
        }
    });
    let fetcher = fetch_fn(|id: u64| async move { Ok::<_, FetchError>(id) });
    let pipeline = Pipeline::new(PipelineConfig::new(5, 5), fetcher).expect("valid config");

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        pipeline.run(IterSource::fallible(items)),
    )
    .await
    .expect("pipeline must not hang")
    .expect("run");

    assert_eq!(outcome.result.len(), 4);
    assert!((0..4u64).all(|id| outcome.result.contains(&id)));
    assert!(outcome.producer.upstream_error.is_some());
    assert_eq!(
        outcome.metrics.upstream_error.as_deref(),
        Some("upstream source failed: page fetch failed at 4")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_id_appears_exactly_once() {
    let fetcher = ProbeFetcher::new(Duration::from_micros(200));
    let pipeline = Pipeline::new(PipelineConfig::new(8, 16), fetcher).expect("valid config");

    let outcome = pipeline.run(iter_source(0..500u64)).await.expect("run");

    assert_eq!(outcome.result.len(), 500);
    assert_eq!(outcome.result.duplicate_count(), 0);
    let mut ids: Vec<u64> = outcome.result.iter().map(|(id, _)| *id).collect();
    ids.sort_unstable();
    assert_eq!(ids, (0..500).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrency_never_exceeds_worker_count() {
    let fetcher = Arc::new(ProbeFetcher::new(Duration::from_millis(5)));
    let pipeline =
        Pipeline::new(PipelineConfig::new(4, 12), fetcher.clone()).expect("valid config");

    let outcome = pipeline.run(iter_source(0..60u64)).await.expect("run");

    assert_eq!(outcome.result.len(), 60);
    assert_eq!(fetcher.calls(), 60);
    assert!(fetcher.max_concurrency() <= 4, "saw {}", fetcher.max_concurrency());
    assert!(fetcher.max_concurrency() >= 1);
    assert!(outcome.metrics.peak_in_flight <= 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_small_queue_applies_backpressure() {
    let fetcher = ProbeFetcher::new(Duration::from_millis(5));
    let pipeline = Pipeline::new(PipelineConfig::new(2, 2), fetcher).expect("valid config");

    let outcome = pipeline.run(iter_source(0..20u64)).await.expect("run");

    assert_eq!(outcome.result.len(), 20);
    assert!(outcome.metrics.blocked_puts >= 1, "producer never blocked");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slow_producer_does_not_starve_workers_into_exit() {
    helpers::init_tracing();
    let fetcher = fetch_fn(|id: u64| async move { Ok::<_, FetchError>(id + 100) });
    let pipeline = Pipeline::new(PipelineConfig::new(5, 5), fetcher).expect("valid config");
    // Workers drain each item long before the next one arrives.
    let slow = PacedSource::new(iter_source(0..15u64), Duration::from_millis(15));

    let outcome = pipeline.run(slow).await.expect("run");

    assert_eq!(outcome.result.len(), 15);
    assert!((0..15u64).all(|id| outcome.result.value(&id) == Some(&(id + 100))));
    assert_eq!(outcome.workers.iter().map(|w| w.processed).sum::<usize>(), 15);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bursty_channel_source_with_opaque_keys() {
    let (tx, src) = source::<String>(4);
    tokio::spawn(async move {
        for burst in 0..3 {
            for i in 0..4 {
                tx.send(format!("user-{burst}-{i}")).await.unwrap();
            }
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
    });
    let fetcher = fetch_fn(|key: String| async move { Ok::<_, FetchError>(key.len()) });
    let pipeline = Pipeline::new(PipelineConfig::new(3, 3), fetcher).expect("valid config");

    let outcome = pipeline.run(src).await.expect("run");

    assert_eq!(outcome.result.len(), 12);
    assert_eq!(outcome.result.value(&"user-2-3".to_string()), Some(&8));
}

async fn classify(workers: usize, max_attempts: usize) -> HashMap<u64, (bool, usize)> {
    let config = PipelineConfig::new(workers, 8).with_retry_policy(fast_retry(max_attempts));
    let pipeline = Pipeline::new(config, FlakyFetcher::new(2)).expect("valid config");
    let outcome = pipeline.run(iter_source(0..40u64)).await.expect("run");
    outcome
        .result
        .iter()
        .map(|(id, entry)| {
            let attempts = entry.failure().map(|f| f.attempts).unwrap_or(0);
            (*id, (entry.is_success(), attempts))
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_flaky_fetch_classification_is_deterministic() {
    let baseline = classify(1, 3).await;
    assert_eq!(baseline.len(), 40);
    assert!(baseline.values().all(|(ok, _)| *ok));
    for workers in [3, 8] {
        assert_eq!(classify(workers, 3).await, baseline);
    }

    let exhausted = classify(1, 2).await;
    assert!(exhausted.values().all(|(ok, attempts)| !*ok && *attempts == 2));
    for workers in [3, 8] {
        assert_eq!(classify(workers, 2).await, exhausted);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_timeouts_are_retried_then_recorded() {
    let fetcher = fetch_fn(|id: u64| async move {
        if id == 0 {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        Ok::<_, FetchError>(id)
    });
    let config = PipelineConfig::new(2, 4)
        .with_fetch_timeout(Duration::from_millis(20))
        .with_retry_policy(fast_retry(2));
    let pipeline = Pipeline::new(config, fetcher).expect("valid config");

    let outcome = pipeline.run(iter_source(0..4u64)).await.expect("run");

    let failure = outcome.result.get(&0).and_then(|e| e.failure()).expect("timeout failure");
    assert_eq!(failure.kind, FailureKind::Timeout);
    assert_eq!(failure.attempts, 2);
    assert_eq!(outcome.result.success_count(), 3);
    assert_eq!(outcome.metrics.retries, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancellation_completes_the_join() {
    helpers::init_tracing();
    // The sender stays alive, so only cancellation can end the run.
    let (tx, src) = source::<u64>(64);
    for id in 0..40u64 {
        tx.send(id).await.unwrap();
    }
    let fetcher = fetch_fn(|id: u64| async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok::<_, FetchError>(id)
    });
    let pipeline = Pipeline::new(
        PipelineConfig::new(2, 5).without_fetch_timeout(),
        fetcher,
    )
    .expect("valid config");

    let cancel = pipeline.cancel_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });
    let outcome = tokio::time::timeout(Duration::from_secs(5), pipeline.run(src))
        .await
        .expect("cancelled pipeline must finish")
        .expect("run");
    drop(tx);

    assert!(outcome.metrics.cancelled);
    assert!(outcome.producer.cancelled);
    assert!(outcome.producer.enqueued >= 2);
    assert!(outcome.producer.enqueued < 40);
    // every enqueued item is still accounted for
    assert_eq!(outcome.result.len(), outcome.producer.enqueued);
    assert!(outcome
        .result
        .failures()
        .all(|(_, f)| f.kind == FailureKind::Cancelled));
    assert_eq!(outcome.result.success_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_empty_source_returns_empty_result() {
    let fetcher = fetch_fn(|id: u64| async move { Ok::<_, FetchError>(id) });
    let pipeline = Pipeline::new(PipelineConfig::new(3, 3), fetcher).expect("valid config");

    let outcome = pipeline.run(iter_source(Vec::<u64>::new())).await.expect("run");

    assert!(outcome.result.is_empty());
    assert_eq!(outcome.metrics.enqueued, 0);
    assert_eq!(outcome.workers.len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_duplicate_ids_are_detected() {
    let fetcher = fetch_fn(|id: u64| async move { Ok::<_, FetchError>(id) });
    let pipeline = Pipeline::new(PipelineConfig::new(2, 4), fetcher).expect("valid config");

    let outcome = pipeline
        .run(iter_source(vec![1u64, 2, 2, 3]))
        .await
        .expect("run");

    assert_eq!(outcome.result.len(), 3);
    assert_eq!(outcome.result.duplicate_count(), 1);
    assert_eq!(outcome.metrics.duplicates, 1);
}

#[test]
fn test_invalid_config_is_rejected() {
    let fetcher = fetch_fn(|id: u64| async move { Ok::<_, FetchError>(id) });
    let err = Pipeline::new(PipelineConfig::new(4, 2), fetcher).err().expect("rejected");
    assert!(matches!(err, PipelineError::Config(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pool_dying_does_not_hang_the_join() {
    helpers::init_tracing();
    let fetcher = fetch_fn(|id: u64| async move {
        if id < 2 {
            panic!("fetcher crashed on {id}");
        }
        Ok::<_, FetchError>(id)
    });
    let pipeline = Pipeline::new(PipelineConfig::new(2, 2), fetcher).expect("valid config");
    let cancel = pipeline.cancel_handle();

    let result = tokio::time::timeout(Duration::from_secs(3), pipeline.run(iter_source(0..20u64)))
        .await
        .expect("pipeline must not hang when its workers die");

    match result {
        Err(PipelineError::Join(e)) => assert!(e.is_panic()),
        Err(other) => panic!("expected a join error, got {other}"),
        Ok(_) => panic!("expected a join error, got a completed run"),
    }
    // the run is torn down internally; the caller's token is left alone
    assert!(!cancel.is_cancelled());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancelled_run_does_not_affect_the_next_one() {
    let fetcher = Arc::new(ProbeFetcher::new(Duration::ZERO));

    let first = Pipeline::new(PipelineConfig::new(2, 4), fetcher.clone()).expect("valid config");
    first.cancel_handle().cancel();
    let outcome = first.run(iter_source(0..5u64)).await.expect("run");
    assert!(outcome.metrics.cancelled);
    assert_eq!(outcome.result.success_count(), 0);

    let second = Pipeline::new(PipelineConfig::new(2, 4), fetcher.clone()).expect("valid config");
    let outcome = second.run(iter_source(0..5u64)).await.expect("run");
    assert!(!outcome.metrics.cancelled);
    assert_eq!(outcome.result.success_count(), 5);
    assert_eq!(outcome.result.value(&4), Some(&8));
    assert_eq!(fetcher.calls(), 5);
}
