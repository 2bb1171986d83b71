//! End-to-end benchmark: a two-federate value exchange stepping through
//! simulated time on a standalone core.

use criterion::{criterion_group, criterion_main, Criterion};

use concord_core::{Time, Value, ValueKind};
use concord_engine::{Core, CoreConfig, FederateConfig};

fn bench_step_loop(c: &mut Criterion) {
    c.bench_function("federation/pubsub_step", |b| {
        let core = Core::spawn(CoreConfig::default()).unwrap();
        let mut producer = core.federate(FederateConfig::new("producer")).unwrap();
        let mut consumer = core.federate(FederateConfig::new("consumer")).unwrap();
        let publication = producer
            .register_publication("level", ValueKind::Double, None)
            .unwrap();
        let input = consumer
            .register_input("producer/level", ValueKind::Double)
            .unwrap();
        producer.enter_initializing_mode().unwrap();
        consumer.enter_initializing_mode().unwrap();
        producer.enter_executing_mode_async().unwrap();
        consumer.enter_executing_mode_async().unwrap();
        producer.enter_executing_mode_complete().unwrap();
        consumer.enter_executing_mode_complete().unwrap();

        let mut step = 0u64;
        b.iter(|| {
            step += 1;
            let next = Time::from_nanos(step as i64 * 1_000_000);
            producer.publish(publication, Value::Double(step as f64)).unwrap();
            producer.request_time_async(next).unwrap();
            consumer.request_time_async(next).unwrap();
            producer.request_time_complete().unwrap();
            consumer.request_time_complete().unwrap();
            consumer.input_value(input).unwrap()
        });
    });
}

criterion_group!(benches, bench_step_loop);
criterion_main!(benches);
