//! Core types for the Concord co-simulation federation engine.
//!
//! This is the leaf crate with zero internal dependencies. It defines
//! the fundamental abstractions used throughout the Concord workspace:
//! simulation time, typed identifiers and interface handles, the tagged
//! value variant, the message envelope, federate time properties, and
//! the error taxonomy.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod error;
pub mod id;
pub mod message;
pub mod properties;
pub mod time;
pub mod value;

pub use error::{FederateError, RegistrationError, TypeMismatch};
pub use id::{
    qualified_name, CoreId, EndpointHandle, FederateId, FilterHandle, InputHandle,
    PublicationHandle, NAME_SEPARATOR,
};
pub use message::Message;
pub use properties::{FederateLifecycle, IterationRequest, IterationResult, TimeProperties};
pub use time::Time;
pub use value::{Value, ValueKind};
