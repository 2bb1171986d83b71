//! Core and federate configuration.

use std::error::Error;
use std::fmt;
use std::time::Duration;

use concord_core::{Time, TimeProperties, NAME_SEPARATOR};

/// Configuration for a [`Core`](crate::service::Core).
#[derive(Clone, Debug)]
pub struct CoreConfig {
    /// Core name, unique among the children of its broker.
    pub name: String,
    /// When set, a binding whose declared kinds are incompatible fails
    /// the registration call instead of being recorded as a warning.
    pub strict_type_checking: bool,
    /// When set, a federate blocked on a grant for longer than this
    /// wall-clock duration receives a `GrantTimeout` error and is moved
    /// to `Errored`. Unblocked federates are unaffected.
    pub grant_timeout: Option<Duration>,
    /// Capacity of the request channel between federate handles and the
    /// core service thread.
    pub request_capacity: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            name: "core".to_string(),
            strict_type_checking: false,
            grant_timeout: None,
            request_capacity: 64,
        }
    }
}

impl CoreConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_name(&self.name)?;
        if self.request_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(())
    }
}

/// Configuration for a federate joining a core.
#[derive(Clone, Debug)]
pub struct FederateConfig {
    /// Federate name; prefixes the fully-qualified names of its
    /// interfaces.
    pub name: String,
    /// Time control properties, fixed for the federate's lifetime.
    pub properties: TimeProperties,
}

impl FederateConfig {
    /// A federate config with default time properties.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            properties: TimeProperties::default(),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_name(&self.name)?;
        for (property, value) in [
            ("period", self.properties.period),
            ("offset", self.properties.offset),
            ("time_delta", self.properties.time_delta),
            ("input_delay", self.properties.input_delay),
            ("output_delay", self.properties.output_delay),
        ] {
            if value < Time::ZERO {
                return Err(ConfigError::NegativeProperty { property });
            }
        }
        if self.properties.period > Time::ZERO && self.properties.offset >= self.properties.period
        {
            return Err(ConfigError::OffsetOutsideCycle {
                offset: self.properties.offset,
                period: self.properties.period,
            });
        }
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::EmptyName);
    }
    if name.contains(NAME_SEPARATOR) {
        return Err(ConfigError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Errors from validating or applying a configuration.
#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// A core or federate name is empty.
    EmptyName,
    /// A name contains the reserved separator character.
    InvalidName {
        /// The offending name.
        name: String,
    },
    /// A time property that must be non-negative is negative.
    NegativeProperty {
        /// Which property.
        property: &'static str,
    },
    /// The period offset must be smaller than the period.
    OffsetOutsideCycle {
        /// The configured offset.
        offset: Time,
        /// The configured period.
        period: Time,
    },
    /// The request channel capacity is zero.
    ZeroCapacity,
    /// A federate with this name is already registered with the core.
    DuplicateFederate {
        /// The colliding name.
        name: String,
    },
    /// The core service thread is gone.
    CoreUnavailable,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyName => write!(f, "name must not be empty"),
            Self::InvalidName { name } => {
                write!(f, "name '{name}' contains the reserved '{NAME_SEPARATOR}'")
            }
            Self::NegativeProperty { property } => {
                write!(f, "time property '{property}' must be non-negative")
            }
            Self::OffsetOutsideCycle { offset, period } => {
                write!(f, "offset {offset} must be smaller than period {period}")
            }
            Self::ZeroCapacity => write!(f, "request channel capacity must be at least 1"),
            Self::DuplicateFederate { name } => {
                write!(f, "federate '{name}' is already registered")
            }
            Self::CoreUnavailable => write!(f, "core service thread is not running"),
        }
    }
}

impl Error for ConfigError {}
