//! Pool load benchmarks.
//!
//! Measures enqueue-to-drain throughput across priority mixes.

use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use tidepool::{Pool, PoolConfig, WorkItem, WorkPriority};

fn batch_config(workers: usize) -> PoolConfig {
    PoolConfig {
        min_workers: workers,
        max_workers: workers,
        management_interval: Duration::from_millis(5),
        ..Default::default()
    }
}

async fn run_batch(workers: usize, items: usize) {
    let pool = Pool::new(batch_config(workers));
    pool.start().await.unwrap();

    let priorities = [WorkPriority::High, WorkPriority::Normal, WorkPriority::Low];
    for i in 0..items {
        let priority = priorities[i % priorities.len()];
        pool.enqueue(WorkItem::new(priority, |_cancel| async { Ok(()) }))
            .await
            .unwrap();
    }

    while pool.backlog_snapshot().total() > 0 {
        tokio::task::yield_now().await;
    }
    pool.stop().await;
}

fn bench_enqueue_drain(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("enqueue_drain");

    for (workers, items) in [(2, 256), (4, 1024)] {
        group.throughput(Throughput::Elements(items as u64));
        group.bench_function(BenchmarkId::new(format!("workers_{workers}"), items), |b| {
            b.iter(|| runtime.block_on(run_batch(workers, items)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_enqueue_drain);
criterion_main!(benches);
