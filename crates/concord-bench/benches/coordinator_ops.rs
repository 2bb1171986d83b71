//! Criterion micro-benchmarks for the time coordination primitives.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use concord_bench::staggered_coordinators;
use concord_core::Time;

fn bench_contribution(c: &mut Criterion) {
    let mut group = c.benchmark_group("coordinator");
    for n in [8, 64, 512] {
        let coordinators = staggered_coordinators(n);
        // The inner loop of a granting pass: the minimum contribution
        // over every other federate.
        group.bench_function(format!("min_contribution_{n}"), |b| {
            b.iter(|| {
                let mut bound = Time::MAXTIME;
                for coordinator in &coordinators {
                    bound = bound.min(coordinator.contribution(black_box(None)));
                }
                bound
            });
        });
    }
    group.finish();
}

fn bench_next_allowed(c: &mut Criterion) {
    let coordinators = staggered_coordinators(64);
    c.bench_function("coordinator/next_allowed_64", |b| {
        b.iter(|| {
            coordinators
                .iter()
                .map(|coordinator| {
                    coordinator.next_allowed(black_box(Time::from_nanos(987_654_321)))
                })
                .min()
        });
    });
}

criterion_group!(benches, bench_contribution, bench_next_allowed);
criterion_main!(benches);
