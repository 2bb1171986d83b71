//! Multi-core federation scenarios: values, messages, and time
//! coordination flowing through a broker hierarchy.

use std::thread;

use concord::prelude::*;

fn seconds(s: f64) -> Time {
    Time::from_seconds(s)
}

fn core_named(name: &str) -> CoreConfig {
    CoreConfig {
        name: name.to_string(),
        ..CoreConfig::default()
    }
}

fn attached_core(broker: &Broker, name: &str) -> Core {
    let link = broker.attach_child().unwrap();
    Core::spawn_with_upstream(core_named(name), link).unwrap()
}

fn start(fed: &mut Federate) {
    fed.enter_initializing_mode().unwrap();
    fed.enter_executing_mode_async().unwrap();
}

fn finish_start(fed: &mut Federate) {
    assert_eq!(
        fed.enter_executing_mode_complete().unwrap(),
        IterationResult::NextStep
    );
}

#[test]
fn value_crosses_cores_through_broker() {
    let broker = Broker::spawn(BrokerConfig::default());
    let west = attached_core(&broker, "west");
    let east = attached_core(&broker, "east");
    let mut producer = west.federate(FederateConfig::new("producer")).unwrap();
    let mut consumer = east.federate(FederateConfig::new("consumer")).unwrap();
    let publication = producer
        .register_publication("voltage", ValueKind::Double, Some("V"))
        .unwrap();
    let input = consumer
        .register_input("producer/voltage", ValueKind::Double)
        .unwrap();
    start(&mut producer);
    start(&mut consumer);
    finish_start(&mut producer);
    finish_start(&mut consumer);

    let producer_thread = thread::spawn(move || {
        producer.publish(publication, Value::Double(230.0)).unwrap();
        assert_eq!(producer.request_time(seconds(10.0)).unwrap(), seconds(10.0));
        producer.finalize().unwrap();
    });

    // The publication at time zero crosses the broker and wakes the
    // consumer immediately.
    assert_eq!(consumer.request_time(seconds(10.0)).unwrap(), Time::ZERO);
    assert!(consumer.check_update(input).unwrap());
    assert_eq!(
        consumer.input_value(input).unwrap(),
        Some(Value::Double(230.0))
    );
    assert_eq!(consumer.request_time(seconds(10.0)).unwrap(), seconds(10.0));
    consumer.finalize().unwrap();
    producer_thread.join().unwrap();

    let metrics = broker.metrics().unwrap();
    assert!(metrics.values_routed >= 1);
    assert!(metrics.values_fanned_out >= 1);
}

#[test]
fn message_routes_to_remote_endpoint() {
    let broker = Broker::spawn(BrokerConfig::default());
    let west = attached_core(&broker, "west");
    let east = attached_core(&broker, "east");
    let mut sender = west.federate(FederateConfig::new("sender")).unwrap();
    let mut receiver = east.federate(FederateConfig::new("receiver")).unwrap();
    let out = sender.register_endpoint("out").unwrap();
    let inbox = receiver.register_endpoint("in").unwrap();
    start(&mut sender);
    start(&mut receiver);
    finish_start(&mut sender);
    finish_start(&mut receiver);

    let sender_thread = thread::spawn(move || {
        sender
            .send_message(out, "receiver/in", b"open breaker 12".to_vec())
            .unwrap();
        assert_eq!(sender.request_time(seconds(5.0)).unwrap(), seconds(5.0));
        sender.finalize().unwrap();
    });

    assert_eq!(receiver.request_time(seconds(5.0)).unwrap(), Time::ZERO);
    let msg = receiver.next_message(inbox).unwrap().expect("message due");
    assert_eq!(msg.payload, b"open breaker 12");
    assert_eq!(msg.source, "sender/out");
    assert_eq!(receiver.request_time(seconds(5.0)).unwrap(), seconds(5.0));
    receiver.finalize().unwrap();
    sender_thread.join().unwrap();
}

#[test]
fn duplicate_global_name_rejected_across_cores() {
    let broker = Broker::spawn(BrokerConfig::default());
    let west = attached_core(&broker, "west");
    let east = attached_core(&broker, "east");
    let first = west.federate(FederateConfig::new("alpha")).unwrap();
    let second = east.federate(FederateConfig::new("beta")).unwrap();
    // The first claim on the global name wins at the root.
    first
        .register_global_publication("grid_frequency", ValueKind::Double, None)
        .unwrap();
    assert!(matches!(
        second.register_global_publication("grid_frequency", ValueKind::Double, None),
        Err(FederateError::Registration(
            RegistrationError::DuplicateName { .. }
        ))
    ));
    // Endpoints share the rejection path.
    first.register_global_endpoint("control").unwrap();
    assert!(matches!(
        second.register_global_endpoint("control"),
        Err(FederateError::Registration(
            RegistrationError::DuplicateName { .. }
        ))
    ));
}

#[test]
fn value_crosses_nested_brokers() {
    let root = Broker::spawn(BrokerConfig {
        name: "root".to_string(),
    });
    let sub_link = root.attach_child().unwrap();
    let sub = Broker::spawn_with_parent(
        BrokerConfig {
            name: "sub".to_string(),
        },
        sub_link,
    );
    let west = attached_core(&sub, "west");
    let east = attached_core(&root, "east");
    let mut producer = west.federate(FederateConfig::new("producer")).unwrap();
    let mut consumer = east.federate(FederateConfig::new("consumer")).unwrap();
    let publication = producer
        .register_publication("flow", ValueKind::Double, None)
        .unwrap();
    consumer
        .register_input("producer/flow", ValueKind::Double)
        .unwrap();
    start(&mut producer);
    start(&mut consumer);
    finish_start(&mut producer);
    finish_start(&mut consumer);

    let producer_thread = thread::spawn(move || {
        producer.publish(publication, Value::Double(42.0)).unwrap();
        assert_eq!(producer.request_time(seconds(1.0)).unwrap(), seconds(1.0));
        producer.finalize().unwrap();
    });

    // Two broker hops: west -> sub -> root -> east.
    assert_eq!(consumer.request_time(seconds(1.0)).unwrap(), Time::ZERO);
    assert_eq!(consumer.request_time(seconds(1.0)).unwrap(), seconds(1.0));
    consumer.finalize().unwrap();
    producer_thread.join().unwrap();
}

#[test]
fn remote_mismatch_is_reported_to_subscriber() {
    let broker = Broker::spawn(BrokerConfig::default());
    let west = attached_core(&broker, "west");
    let east = Core::spawn_with_upstream(
        CoreConfig {
            name: "east".to_string(),
            strict_type_checking: true,
            ..CoreConfig::default()
        },
        broker.attach_child().unwrap(),
    )
    .unwrap();
    let publisher = west.federate(FederateConfig::new("pub_fed")).unwrap();
    let subscriber = east.federate(FederateConfig::new("sub_fed")).unwrap();
    publisher
        .register_publication("state", ValueKind::Text, None)
        .unwrap();
    // Strict mode: the root reports the kind disagreement and the
    // registration fails.
    assert!(matches!(
        subscriber.register_input("pub_fed/state", ValueKind::Double),
        Err(FederateError::TypeMismatch(_))
    ));
}

#[test]
fn broker_shutdown_disconnects_federates() {
    let broker = Broker::spawn(BrokerConfig::default());
    let west = attached_core(&broker, "west");
    let east = attached_core(&broker, "east");
    let mut blocked = west.federate(FederateConfig::new("blocked")).unwrap();
    let mut idle = east.federate(FederateConfig::new("idle")).unwrap();
    start(&mut blocked);
    start(&mut idle);
    finish_start(&mut blocked);
    finish_start(&mut idle);

    let blocked_thread = thread::spawn(move || {
        // `idle` never advances, so this waits until the fabric dies.
        assert_eq!(
            blocked.request_time(seconds(10.0)),
            Err(FederateError::ConnectionLost)
        );
        assert_eq!(blocked.state(), FederateLifecycle::Errored);
    });
    // Give the request time to park, then tear the federation down.
    thread::sleep(std::time::Duration::from_millis(50));
    broker.shutdown();
    blocked_thread.join().unwrap();
    drop(idle);
}
