//! Interpreter benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use stateviz_bench::{deep_chain, parallel_rings, traffic_light};
use stateviz_core::{Event, Machine, MachineDefinition};

fn bench_definition(c: &mut Criterion) {
    let mut group = c.benchmark_group("definition_load");

    let light = traffic_light().to_string();
    group.bench_function("traffic_light", |b| {
        b.iter(|| black_box(MachineDefinition::from_str(&light).unwrap()))
    });

    for regions in [2, 8, 32] {
        let json = parallel_rings(regions, 8).to_string();
        group.bench_with_input(BenchmarkId::new("parallel_rings", regions), &json, |b, json| {
            b.iter(|| black_box(MachineDefinition::from_str(json).unwrap()))
        });
    }

    group.finish();
}

fn bench_transition(c: &mut Criterion) {
    let mut group = c.benchmark_group("transition");
    group.throughput(Throughput::Elements(1));

    let machine = Machine::from_str(&traffic_light().to_string()).unwrap();
    let state = machine.initial_state().unwrap();
    let timer = Event::new("TIMER");
    group.bench_function("traffic_light", |b| {
        b.iter(|| black_box(machine.transition(&state, &timer).unwrap()))
    });

    let unhandled = Event::new("UNKNOWN");
    group.bench_function("unhandled", |b| {
        b.iter(|| black_box(machine.transition(&state, &unhandled).unwrap()))
    });

    let next = Event::new("NEXT");
    for regions in [2, 8, 32] {
        let machine = Machine::from_str(&parallel_rings(regions, 8).to_string()).unwrap();
        let state = machine.initial_state().unwrap();
        group.bench_with_input(BenchmarkId::new("parallel_rings", regions), &state, |b, state| {
            b.iter(|| black_box(machine.transition(state, &next).unwrap()))
        });
    }

    let reset = Event::new("RESET");
    for depth in [4, 16, 64] {
        let machine = Machine::from_str(&deep_chain(depth).to_string()).unwrap();
        let state = machine.initial_state().unwrap();
        group.bench_with_input(BenchmarkId::new("deep_chain", depth), &state, |b, state| {
            b.iter(|| black_box(machine.transition(state, &reset).unwrap()))
        });
    }

    group.finish();
}

fn bench_history(c: &mut Criterion) {
    let mut group = c.benchmark_group("history");

    let machine = Machine::from_str(&parallel_rings(8, 8).to_string()).unwrap();
    let mut state = machine.initial_state().unwrap();
    for _ in 0..3 {
        state = machine.transition(&state, &Event::new("NEXT")).unwrap();
    }
    let paused = machine.transition(&state, &Event::new("PAUSE")).unwrap();
    let resume = Event::new("RESUME");

    group.bench_function("pause", |b| {
        let pause = Event::new("PAUSE");
        b.iter(|| black_box(machine.transition(&state, &pause).unwrap()))
    });

    group.bench_function("resume", |b| {
        b.iter(|| black_box(machine.transition(&paused, &resume).unwrap()))
    });

    group.finish();
}

fn bench_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("queries");

    for regions in [2, 8, 32] {
        let machine = Machine::from_str(&parallel_rings(regions, 8).to_string()).unwrap();
        let state = machine.initial_state().unwrap();

        group.bench_with_input(BenchmarkId::new("active_ids", regions), &state, |b, state| {
            b.iter(|| black_box(machine.active_ids(state)))
        });

        group.bench_with_input(BenchmarkId::new("next_events", regions), &state, |b, state| {
            b.iter(|| black_box(machine.next_events(state).unwrap()))
        });

        group.bench_with_input(BenchmarkId::new("configuration", regions), &state, |b, state| {
            b.iter(|| black_box(machine.configuration(&state.value).unwrap()))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_definition,
    bench_transition,
    bench_history,
    bench_queries
);
criterion_main!(benches);
