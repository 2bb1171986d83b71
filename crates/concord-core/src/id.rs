//! Strongly-typed identifiers and interface handles.

use std::fmt;

/// Identifies a federate within its owning core.
///
/// Federates are registered with a core and assigned sequential IDs.
/// `FederateId(n)` corresponds to the n-th federate registered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FederateId(pub u32);

impl fmt::Display for FederateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for FederateId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Identifies a core (or sub-broker) within the broker hierarchy.
///
/// Assigned by the parent broker when a child attaches; unique among
/// the children of that broker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoreId(pub u16);

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for CoreId {
    fn from(v: u16) -> Self {
        Self(v)
    }
}

/// Stable handle to a registered publication.
///
/// Indexes the owning federate's publications in registration order.
/// Valid for the federate's lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicationHandle(pub u32);

impl fmt::Display for PublicationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable handle to a registered input (subscription).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InputHandle(pub u32);

impl fmt::Display for InputHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable handle to a registered endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointHandle(pub u32);

impl fmt::Display for EndpointHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable handle to a registered filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FilterHandle(pub u32);

impl fmt::Display for FilterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Separator between a federate name and a local interface name when
/// deriving a fully-qualified key (`federate/name`).
pub const NAME_SEPARATOR: char = '/';

/// Derive the fully-qualified key for a local interface name.
pub fn qualified_name(federate: &str, local: &str) -> String {
    format!("{federate}{NAME_SEPARATOR}{local}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_name_joins_with_separator() {
        assert_eq!(qualified_name("fed_a", "voltage"), "fed_a/voltage");
    }

    #[test]
    fn display_is_numeric() {
        assert_eq!(FederateId(3).to_string(), "3");
        assert_eq!(CoreId(1).to_string(), "1");
        assert_eq!(PublicationHandle(0).to_string(), "0");
    }
}
