//! The message envelope exchanged between endpoints.

use crate::time::Time;

/// A discrete message in flight between endpoints.
///
/// Immutable once sent: filters never modify a message in place, they
/// produce new envelopes. `original_source` and `original_dest` survive
/// rerouting and cloning so the receiver can always see where a message
/// entered the federation and where it was first aimed.
///
/// Ordering at a shared delivery instant is by `(delivery_time,
/// arrival_seq)`; the arrival sequence is assigned once by the sending
/// core and never renumbered by filters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Fully-qualified name of the sending endpoint.
    pub source: String,
    /// Fully-qualified name of the destination endpoint.
    pub dest: String,
    /// The source as originally sent, before any filter rewrote it.
    pub original_source: String,
    /// The destination as originally sent, before any reroute.
    pub original_dest: String,
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
    /// Logical time at which the sender issued the message.
    pub send_time: Time,
    /// Resolved delivery time; always `>= send_time`.
    pub delivery_time: Time,
    /// Monotonic per-core sequence assigned at send, for stable
    /// same-instant ordering.
    pub arrival_seq: u64,
}

impl Message {
    /// Construct a fresh message from a sender.
    ///
    /// The delivery time starts equal to the send time; filters and
    /// interface delays push it later. Original source/destination are
    /// initialized to the given source/destination.
    pub fn new(source: &str, dest: &str, payload: Vec<u8>, send_time: Time) -> Message {
        Message {
            source: source.to_string(),
            dest: dest.to_string(),
            original_source: source.to_string(),
            original_dest: dest.to_string(),
            payload,
            send_time,
            delivery_time: send_time,
            arrival_seq: 0,
        }
    }

    /// A copy with the delivery time pushed later by `delta`.
    ///
    /// The result never moves earlier than the send time.
    pub fn delayed_by(&self, delta: Time) -> Message {
        let base = self.delivery_time.max(self.send_time);
        Message {
            delivery_time: base + delta,
            ..self.clone()
        }
    }

    /// A copy rerouted to a new destination, preserving `original_dest`.
    pub fn rerouted_to(&self, new_dest: &str) -> Message {
        Message {
            dest: new_dest.to_string(),
            ..self.clone()
        }
    }
}
