//! Fixture builders for tests.

use concord_core::{Message, Time, TimeProperties};

/// A message from `source` to `dest` sent and delivered at `seconds`.
pub fn message_at(source: &str, dest: &str, payload: &[u8], seconds: f64) -> Message {
    Message::new(source, dest, payload.to_vec(), Time::from_seconds(seconds))
}

/// Time properties for a periodic federate.
pub fn periodic(period_seconds: f64) -> TimeProperties {
    TimeProperties {
        period: Time::from_seconds(period_seconds),
        ..TimeProperties::default()
    }
}

/// Time properties with input and output delays.
pub fn with_delays(input_seconds: f64, output_seconds: f64) -> TimeProperties {
    TimeProperties {
        input_delay: Time::from_seconds(input_seconds),
        output_delay: Time::from_seconds(output_seconds),
        ..TimeProperties::default()
    }
}
