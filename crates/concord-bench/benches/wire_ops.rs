//! Criterion micro-benchmarks for the wire codec.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use concord_bench::{message_frame, value_frame};
use concord_broker::wire;

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("wire_encode");
    for len in [8, 64, 512] {
        let frame = value_frame(len);
        group.bench_function(format!("value_vector_{len}"), |b| {
            b.iter(|| wire::encode(black_box(&frame)));
        });
    }
    for len in [16, 1024] {
        let frame = message_frame(len);
        group.bench_function(format!("message_{len}b"), |b| {
            b.iter(|| wire::encode(black_box(&frame)));
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("wire_decode");
    for len in [8, 64, 512] {
        let bytes = wire::encode(&value_frame(len));
        group.bench_function(format!("value_vector_{len}"), |b| {
            b.iter(|| wire::decode(black_box(&bytes)).unwrap());
        });
    }
    for len in [16, 1024] {
        let bytes = wire::encode(&message_frame(len));
        group.bench_function(format!("message_{len}b"), |b| {
            b.iter(|| wire::decode(black_box(&bytes)).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
