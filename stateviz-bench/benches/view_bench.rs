//! Graph extraction and marker synchronization benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use stateviz_bench::{deep_chain, parallel_rings};
use stateviz_core::{Event, Machine, MachineDefinition};
use stateviz_view::{extract, route, svg_path, Rect, ViewSynchronizer};

fn bench_extract(c: &mut Criterion) {
    let mut group = c.benchmark_group("extract");

    for regions in [2, 8, 32] {
        let definition = MachineDefinition::from_json(&parallel_rings(regions, 8)).unwrap();
        group.bench_with_input(
            BenchmarkId::new("parallel_rings", regions),
            &definition,
            |b, definition| b.iter(|| black_box(extract(&definition.tree))),
        );
    }

    let definition = MachineDefinition::from_json(&deep_chain(64)).unwrap();
    group.bench_function("deep_chain_64", |b| {
        b.iter(|| black_box(extract(&definition.tree)))
    });

    group.finish();
}

fn bench_sync(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync");

    for regions in [2, 8, 32] {
        let machine = Machine::from_str(&parallel_rings(regions, 8).to_string()).unwrap();
        let first = machine.initial_state().unwrap();
        let second = machine.transition(&first, &Event::new("NEXT")).unwrap();
        let first_ids = machine.active_ids(&first);
        let second_ids = machine.active_ids(&second);
        let events = machine.next_events(&first).unwrap();

        let mut view = ViewSynchronizer::new(extract(machine.tree()));

        group.bench_function(BenchmarkId::new("active_toggle", regions), |b| {
            b.iter(|| {
                black_box(view.sync_active(&first_ids));
                black_box(view.sync_active(&second_ids));
            })
        });

        group.bench_function(BenchmarkId::new("preview", regions), |b| {
            b.iter(|| {
                black_box(view.sync_preview("NEXT", &second_ids));
                black_box(view.clear_preview());
            })
        });

        group.bench_function(BenchmarkId::new("enabled", regions), |b| {
            b.iter(|| black_box(view.sync_enabled(&events)))
        });
    }

    group.finish();
}

fn bench_route(c: &mut Criterion) {
    let source = Rect::new(200.0, 0.0, 100.0, 50.0);
    let anchor = Rect::new(210.0, 10.0, 40.0, 10.0);
    let target = Rect::new(0.0, 0.0, 80.0, 40.0);

    c.bench_function("route_detour", |b| {
        b.iter(|| black_box(svg_path(&route(&source, &anchor, &target))))
    });
}

criterion_group!(benches, bench_extract, bench_sync, bench_route);
criterion_main!(benches);
