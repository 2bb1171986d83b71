//! Concord: a time-coordinated co-simulation federation engine.
//!
//! This is the top-level facade crate that re-exports the public API
//! from all Concord sub-crates. For most users, adding `concord` as a
//! single dependency is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use concord::prelude::*;
//!
//! // A standalone core hosting one federate.
//! let core = Core::spawn(CoreConfig::default()).unwrap();
//! let mut fed = core.federate(FederateConfig::new("meter")).unwrap();
//! let reading = fed
//!     .register_publication("reading", ValueKind::Double, Some("V"))
//!     .unwrap();
//!
//! fed.enter_initializing_mode().unwrap();
//! fed.enter_executing_mode().unwrap();
//!
//! fed.publish(reading, Value::Double(230.0)).unwrap();
//! let granted = fed.request_time(Time::from_seconds(1.0)).unwrap();
//! assert_eq!(granted, Time::from_seconds(1.0));
//!
//! fed.finalize().unwrap();
//! ```
//!
//! # Modules
//!
//! Each module corresponds to a sub-crate. Use them for types not in
//! the prelude:
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `concord-core` | Time, values, messages, ids, errors |
//! | [`filter`] | `concord-filter` | Filter operations and pipelines |
//! | [`broker`] | `concord-broker` | Brokers, the wire codec, transport links |
//! | [`engine`] | `concord-engine` | Cores, federates, time coordination |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Core types and errors (`concord-core`).
///
/// Simulation [`types::Time`], the tagged [`types::Value`] variant,
/// the [`types::Message`] envelope, typed handles, and the error
/// taxonomy.
pub use concord_core as types;

/// Filter operations and pipelines (`concord-filter`).
///
/// The [`filter::FilterOp`] trait is the extension point for custom
/// message transformations; [`filter::DelayFilter`] and friends are
/// the built-ins.
pub use concord_filter as filter;

/// Brokers, the wire codec, and transport links (`concord-broker`).
///
/// [`broker::Broker`] coordinates multiple cores (and sub-brokers)
/// over [`broker::Link`]s; [`broker::memory_link`] creates in-process
/// link pairs.
pub use concord_broker as broker;

/// Cores, federates, and time coordination (`concord-engine`).
///
/// [`engine::Core`] runs the service thread; [`engine::Federate`] is
/// the application-facing handle.
pub use concord_engine as engine;

/// Common imports for typical Concord usage.
///
/// ```rust
/// use concord::prelude::*;
/// ```
pub mod prelude {
    // Time and data
    pub use concord_core::{
        IterationRequest, IterationResult, Message, Time, TimeProperties, Value, ValueKind,
    };

    // Errors
    pub use concord_core::{FederateError, RegistrationError, TypeMismatch};

    // Lifecycle
    pub use concord_core::FederateLifecycle;

    // Engine
    pub use concord_engine::{
        ConfigError, Core, CoreConfig, Federate, FederateConfig, FilterAttach, FilterSpec,
        TimeGrant,
    };

    // Broker
    pub use concord_broker::{memory_link, Broker, BrokerConfig};

    // Filters
    pub use concord_filter::{DelayDistribution, FilterOp, FilterOutcome};
}
