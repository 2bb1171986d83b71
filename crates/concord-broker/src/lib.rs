//! The federation fabric: wire frames, transport links, and the
//! hierarchical broker.
//!
//! Cores and brokers exchange length-delimited binary frames over
//! [`Link`]s. A broker routes registrations up toward the root (which
//! owns the global name table), fans published values back down to
//! subscribed subtrees, forwards point-to-point messages toward the
//! child that registered the destination endpoint, and aggregates the
//! time reports that bound how far each subtree may advance.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod broker;
pub mod error;
pub mod transport;
pub mod wire;

pub use broker::{Broker, BrokerConfig, BrokerMetrics};
pub use error::{LinkError, WireError};
pub use transport::{memory_link, Conduit, Link, MemoryConduit};
pub use wire::{AckOutcome, WireMsg, WIRE_VERSION};
