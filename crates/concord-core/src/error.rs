//! Error types for the federation engine, organized by subsystem:
//! federate-facing call errors and interface registration errors.
//! Transport, wire, and configuration errors live with their owning
//! crates.

use std::error::Error;
use std::fmt;

use crate::properties::FederateLifecycle;
use crate::value::ValueKind;

/// A declared-vs-bound type disagreement between a publication and an
/// input.
///
/// Surfaced as a recorded warning by default, or as
/// [`FederateError::TypeMismatch`] when strict type checking is
/// configured.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeMismatch {
    /// Fully-qualified name of the publication the input bound to.
    pub target: String,
    /// The kind the input declared.
    pub declared: ValueKind,
    /// The kind the publication carries.
    pub found: ValueKind,
}

impl fmt::Display for TypeMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "input declared {} but '{}' publishes {}",
            self.declared, self.target, self.found
        )
    }
}

impl Error for TypeMismatch {}

/// Errors from interface registration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistrationError {
    /// The fully-qualified name collides with an existing interface of
    /// the same class.
    DuplicateName {
        /// The colliding key.
        key: String,
    },
    /// The owning federate has entered `Executing`; no further
    /// registration is accepted.
    RegistrationClosed {
        /// The federate's state at the time of the call.
        state: FederateLifecycle,
    },
    /// A filter referenced an endpoint that is not registered.
    UnknownTarget {
        /// The missing endpoint key.
        key: String,
    },
    /// The name is empty or contains the reserved separator.
    InvalidName {
        /// The offending name.
        name: String,
    },
}

impl fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateName { key } => write!(f, "name '{key}' is already registered"),
            Self::RegistrationClosed { state } => {
                write!(f, "registration closed (federate is {state})")
            }
            Self::UnknownTarget { key } => write!(f, "no endpoint named '{key}'"),
            Self::InvalidName { name } => write!(f, "invalid interface name '{name}'"),
        }
    }
}

impl Error for RegistrationError {}

/// Errors returned from federate-facing calls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FederateError {
    /// The operation is not valid from the federate's current state.
    /// Recoverable: the caller may retry from a valid state, but states
    /// never rewind.
    InvalidTransition {
        /// The state the federate was in.
        from: FederateLifecycle,
        /// The operation attempted.
        operation: &'static str,
    },
    /// The federate reached `Finalized` or `Errored`; terminal for this
    /// federate only.
    NotActive {
        /// The terminal state.
        state: FederateLifecycle,
    },
    /// An async request is already outstanding on this federate.
    AsyncOutstanding,
    /// `*_complete` called with no matching `*_async` outstanding.
    NoAsyncPending,
    /// The configured grant timeout expired while blocked; the federate
    /// has been moved to `Errored`.
    GrantTimeout,
    /// The core (or its upstream broker link) went away.
    ConnectionLost,
    /// Interface registration failed.
    Registration(RegistrationError),
    /// Strict type checking rejected a binding.
    TypeMismatch(TypeMismatch),
    /// An input or endpoint handle does not belong to this federate.
    UnknownHandle,
}

impl fmt::Display for FederateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTransition { from, operation } => {
                write!(f, "cannot {operation} while {from}")
            }
            Self::NotActive { state } => write!(f, "federate is {state}"),
            Self::AsyncOutstanding => write!(f, "an async request is already outstanding"),
            Self::NoAsyncPending => write!(f, "no async request is outstanding"),
            Self::GrantTimeout => write!(f, "grant timed out"),
            Self::ConnectionLost => write!(f, "connection to the core was lost"),
            Self::Registration(e) => write!(f, "registration failed: {e}"),
            Self::TypeMismatch(e) => write!(f, "type mismatch: {e}"),
            Self::UnknownHandle => write!(f, "handle does not belong to this federate"),
        }
    }
}

impl Error for FederateError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Registration(e) => Some(e),
            Self::TypeMismatch(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RegistrationError> for FederateError {
    fn from(e: RegistrationError) -> Self {
        FederateError::Registration(e)
    }
}
