//! Interpreter service round-trip benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use stateviz_bench::traffic_light;
use stateviz_core::Machine;
use stateviz_runtime::{spawn, Config, SnapshotFilter};
use tokio::runtime::Runtime;

fn bench_send(c: &mut Criterion) {
    let mut group = c.benchmark_group("service");
    group.throughput(Throughput::Elements(1));

    let rt = Runtime::new().unwrap();
    let machine = Machine::from_str(&traffic_light().to_string()).unwrap();
    let (handle, _task) = rt.block_on(async { spawn(machine, &Config::default()).unwrap() });

    group.bench_function("send", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(handle.send("TIMER").await.unwrap()) });
    });

    group.bench_function("preview", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(handle.preview("TIMER").await.unwrap()) });
    });

    group.bench_function("snapshot", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(handle.snapshot().await.unwrap()) });
    });

    // Subscriber that never drains
    let _rx = handle.subscribe(SnapshotFilter::default());
    group.bench_function("send_with_subscriber", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(handle.send("TIMER").await.unwrap()) });
    });

    group.finish();
}

criterion_group!(benches, bench_send);
criterion_main!(benches);
