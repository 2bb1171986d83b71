//! Federate lifecycle, time properties, and iteration enums.

use std::fmt;

use crate::time::Time;

/// The lifecycle state of a federate.
///
/// `Finalized` and `Errored` are terminal: the federate object may still
/// be queried for diagnostic fields but never re-enters the federation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FederateLifecycle {
    /// Registered with a core; interfaces may be declared.
    Created,
    /// Interface registration continues; init-phase values may flow for
    /// iterative initialization.
    Initializing,
    /// Advancing through logical time via time requests.
    Executing,
    /// Cleanly left the federation.
    Finalized,
    /// Left the federation due to an error.
    Errored,
}

impl FederateLifecycle {
    /// Whether the federate can no longer participate.
    pub fn is_terminal(self) -> bool {
        matches!(self, FederateLifecycle::Finalized | FederateLifecycle::Errored)
    }
}

impl fmt::Display for FederateLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FederateLifecycle::Created => "created",
            FederateLifecycle::Initializing => "initializing",
            FederateLifecycle::Executing => "executing",
            FederateLifecycle::Finalized => "finalized",
            FederateLifecycle::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// Iteration behavior requested when entering execution or requesting time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IterationRequest {
    /// Proceed without iterating.
    #[default]
    NoIteration,
    /// Iterate unconditionally.
    ForceIteration,
    /// Iterate only if new inputs arrived.
    IterateIfNeeded,
}

/// Outcome of an iterative call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IterationResult {
    /// The federation advanced; proceed to the next step.
    NextStep,
    /// The federation is repeating the current phase; inputs were
    /// refreshed at the same logical time.
    Iterating,
    /// The federation halted before the call could resolve.
    Halted,
}

/// Per-federate time control properties.
///
/// All delays and the period constrain the set of times the coordinator
/// may grant; see the granting algorithm in `concord-engine`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimeProperties {
    /// Grants must be congruent to `offset` modulo `period` when the
    /// period is positive.
    pub period: Time,
    /// Phase offset for the period constraint.
    pub offset: Time,
    /// Minimum advance between consecutive requested-time grants.
    pub time_delta: Time,
    /// Added to the delivery time of everything arriving at this federate.
    pub input_delay: Time,
    /// Added to the delivery time of everything this federate emits, and
    /// to its reported time boundary.
    pub output_delay: Time,
    /// When set, pending events never wake this federate early; they
    /// queue until the requested time is granted.
    pub uninterruptible: bool,
    /// When set, a grant at time T additionally waits until no dependency
    /// can still produce an event at exactly T.
    pub wait_for_current_time_update: bool,
}

impl Default for TimeProperties {
    fn default() -> Self {
        Self {
            period: Time::ZERO,
            offset: Time::ZERO,
            time_delta: Time::ZERO,
            input_delay: Time::ZERO,
            output_delay: Time::ZERO,
            uninterruptible: false,
            wait_for_current_time_update: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(FederateLifecycle::Finalized.is_terminal());
        assert!(FederateLifecycle::Errored.is_terminal());
        assert!(!FederateLifecycle::Executing.is_terminal());
        assert!(!FederateLifecycle::Created.is_terminal());
    }

    #[test]
    fn default_properties_are_zeroed() {
        let p = TimeProperties::default();
        assert_eq!(p.period, Time::ZERO);
        assert_eq!(p.time_delta, Time::ZERO);
        assert!(!p.uninterruptible);
        assert!(!p.wait_for_current_time_update);
    }
}
