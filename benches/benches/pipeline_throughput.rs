use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use sluice_core::{fetch_fn, iter_source, FetchError, Pipeline, PipelineConfig};
use std::time::Duration;

fn benchmark_pipeline(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("tokio runtime");
    let mut group = c.benchmark_group("pipeline_throughput");
    group.measurement_time(Duration::from_secs(10));

    for (workers, capacity) in [(1, 1), (4, 8), (16, 32)] {
        group.bench_with_input(
            BenchmarkId::new("delayed_fetch_1000_items", format!("w{workers}_c{capacity}")),
            &(workers, capacity),
            |b, &(workers, capacity)| {
                b.to_async(&runtime).iter(|| async move {
                    let fetcher = fetch_fn(|id: u64| async move {
                        tokio::time::sleep(Duration::from_micros(100)).await;
                        Ok::<_, FetchError>(id * 2)
                    });
                    let pipeline = Pipeline::new(PipelineConfig::new(workers, capacity), fetcher)
                        .expect("valid config");
                    let outcome = pipeline.run(iter_source(0..1000u64)).await.expect("run");
                    assert_eq!(outcome.result.len(), 1000);
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, benchmark_pipeline);
criterion_main!(benches);
