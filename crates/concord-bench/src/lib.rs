//! Benchmark profiles and utilities for the Concord federation engine.
//!
//! Provides deterministic builders for the objects the benches exercise:
//!
//! - [`value_frame`] / [`message_frame`]: representative wire frames
//! - [`staggered_coordinators`]: a population of federate time
//!   coordinators spread over the timeline

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use concord_broker::WireMsg;
use concord_core::{Message, Time, TimeProperties, Value};
use concord_engine::coordinator::TimeCoordinator;

/// A `ValueData` frame carrying a vector of `len` doubles.
pub fn value_frame(len: usize) -> WireMsg {
    WireMsg::ValueData {
        key: "grid/substation_7/voltage".to_string(),
        time: Time::from_seconds(12.5),
        value: Value::Vector((0..len).map(|i| i as f64 * 0.25).collect()),
        source: "core_west".to_string(),
    }
}

/// A `MessageData` frame with a payload of `len` bytes.
pub fn message_frame(len: usize) -> WireMsg {
    let mut message = Message::new(
        "controller/commands",
        "breaker_12/inbox",
        (0..len).map(|i| i as u8).collect(),
        Time::from_seconds(3.0),
    );
    message.delivery_time = Time::from_seconds(3.1);
    message.arrival_seq = 41;
    WireMsg::MessageData { message }
}

/// `n` coordinators with staggered granted times and periods, the shape
/// a broker-facing granting pass iterates over.
pub fn staggered_coordinators(n: usize) -> Vec<TimeCoordinator> {
    (0..n)
        .map(|i| {
            let props = TimeProperties {
                period: Time::from_nanos((i as i64 % 7) * 1_000_000),
                time_delta: Time::from_nanos((i as i64 % 3) * 500_000),
                output_delay: Time::from_nanos((i as i64 % 5) * 100_000),
                ..TimeProperties::default()
            };
            let mut coordinator = TimeCoordinator::new(props);
            coordinator.start_executing();
            coordinator.complete_grant(Time::from_nanos(i as i64 * 250_000));
            coordinator.begin_request(Time::from_nanos(1_000_000_000 + i as i64));
            coordinator
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_broker::wire;

    #[test]
    fn frames_round_trip() {
        for frame in [value_frame(64), message_frame(256)] {
            let bytes = wire::encode(&frame);
            wire::decode(&bytes).unwrap();
        }
    }

    #[test]
    fn coordinators_are_deterministic() {
        let a = staggered_coordinators(16);
        let b = staggered_coordinators(16);
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.granted(), y.granted());
            assert_eq!(x.contribution(None), y.contribution(None));
        }
    }
}
