//! The Concord core: time coordination, interface routing, and the
//! federate-facing API.
//!
//! A [`Core`](crate::service::Core) runs a single service thread that
//! owns all mutable federation state (the single-writer rule). Federate
//! threads talk to it through enqueued requests carrying oneshot reply
//! channels; the [`Federate`](crate::federate::Federate) handle wraps
//! that handshake in blocking and async/complete call pairs.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod config;
pub mod coordinator;
mod core;
pub mod federate;
pub mod metrics;
mod registry;
pub mod service;

pub use config::{ConfigError, CoreConfig, FederateConfig};
pub use crate::core::{FilterAttach, FilterSpec, TimeGrant};
pub use federate::Federate;
pub use metrics::CoreMetrics;
pub use service::Core;
