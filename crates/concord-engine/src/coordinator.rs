//! Per-federate time coordination.
//!
//! A [`TimeCoordinator`] tracks one federate's granted time, its
//! outstanding request, and its time properties, and answers the two
//! questions the granting pass needs:
//!
//! - [`next_allowed`](TimeCoordinator::next_allowed) /
//!   [`event_grant_time`](TimeCoordinator::event_grant_time): the
//!   smallest conforming time at which this federate could be granted,
//!   for a requested advance or a pending event respectively. Both snap
//!   up onto the `offset + k * period` grid; only requested advances
//!   also honor `time_delta`.
//! - [`contribution`](TimeCoordinator::contribution): a lower bound on
//!   the delivery times of anything this federate may still emit, which
//!   is what everyone else's grants depend on.
//!
//! The struct is pure state; it never blocks and never talks to
//! channels, which keeps the granting algorithm directly testable.

use concord_core::{Time, TimeProperties};

/// Time state for one federate.
#[derive(Clone, Debug)]
pub struct TimeCoordinator {
    granted: Time,
    requested: Option<Time>,
    props: TimeProperties,
    active: bool,
}

impl TimeCoordinator {
    /// A coordinator for a federate that has not entered execution.
    ///
    /// The granted time starts at [`Time::MINTIME`] ("not yet granted").
    pub fn new(props: TimeProperties) -> Self {
        Self {
            granted: Time::MINTIME,
            requested: None,
            props,
            active: true,
        }
    }

    /// The current granted time.
    pub fn granted(&self) -> Time {
        self.granted
    }

    /// The outstanding requested time, if any.
    pub fn requested(&self) -> Option<Time> {
        self.requested
    }

    /// The federate's time properties.
    pub fn props(&self) -> &TimeProperties {
        &self.props
    }

    /// Whether the federate still participates in time coordination.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Enter execution: granted time becomes zero.
    pub fn start_executing(&mut self) {
        self.granted = Time::ZERO;
        self.requested = None;
    }

    /// Record an outstanding request for `desired`.
    pub fn begin_request(&mut self, desired: Time) {
        self.requested = Some(desired);
    }

    /// Resolve the outstanding request with a grant at `time`.
    pub fn complete_grant(&mut self, time: Time) {
        self.granted = time;
        self.requested = None;
    }

    /// Leave time coordination permanently (finalize or error).
    ///
    /// A retired federate contributes [`Time::MAXTIME`]: it can never
    /// send anything again.
    pub fn retire(&mut self) {
        self.active = false;
        self.requested = None;
    }

    /// The smallest grantable time at or above `candidate` for a
    /// requested advance: at least `granted + time_delta`, then snapped
    /// up onto the period grid.
    pub fn next_allowed(&self, candidate: Time) -> Time {
        let mut t = candidate;
        if !self.granted.is_min() {
            let floor = self.granted + self.props.time_delta;
            if t < floor {
                t = floor;
            }
        }
        self.snap_to_period(t)
    }

    /// The conforming wake time for a pending event at `event_time`.
    ///
    /// Event grants are exempt from `time_delta` (they may even repeat
    /// the current granted time) but still land on the period grid and
    /// never precede the current granted time.
    pub fn event_grant_time(&self, event_time: Time) -> Time {
        let floor = if self.granted.is_min() {
            Time::ZERO
        } else {
            self.granted
        };
        self.snap_to_period(event_time.max(floor))
    }

    /// Lower bound on the times at which this federate can still emit
    /// events, as seen by its dependents.
    ///
    /// `earliest_event` is the earliest undelivered event destined for
    /// this federate, which caps how early it might wake.
    pub fn contribution(&self, earliest_event: Option<Time>) -> Time {
        if !self.active {
            return Time::MAXTIME;
        }
        let floor = if self.granted.is_min() {
            Time::ZERO
        } else {
            self.granted
        };
        let base = match self.requested {
            Some(desired) => {
                let mut t = self.next_allowed(desired);
                if !self.props.uninterruptible {
                    if let Some(ev) = earliest_event {
                        t = t.min(self.event_grant_time(ev));
                    }
                }
                t.max(floor)
            }
            None => floor,
        };
        base + self.props.output_delay
    }

    /// Snap `t` up onto `offset + k * period`, if a period is set.
    fn snap_to_period(&self, t: Time) -> Time {
        let period = self.props.period;
        if period <= Time::ZERO || t.is_max() || t.is_min() {
            return t;
        }
        let rel = t.as_nanos() - self.props.offset.as_nanos();
        let rem = rel.rem_euclid(period.as_nanos());
        if rem == 0 {
            t
        } else {
            Time::from_nanos(t.as_nanos() + (period.as_nanos() - rem))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn props() -> TimeProperties {
        TimeProperties::default()
    }

    fn exec(props: TimeProperties) -> TimeCoordinator {
        let mut c = TimeCoordinator::new(props);
        c.start_executing();
        c
    }

    #[test]
    fn starts_not_yet_granted() {
        let c = TimeCoordinator::new(props());
        assert_eq!(c.granted(), Time::MINTIME);
        let mut c = c;
        c.start_executing();
        assert_eq!(c.granted(), Time::ZERO);
    }

    #[test]
    fn next_allowed_is_identity_without_constraints() {
        let c = exec(props());
        assert_eq!(
            c.next_allowed(Time::from_seconds(3.5)),
            Time::from_seconds(3.5)
        );
    }

    #[test]
    fn time_delta_floors_requested_advances() {
        let mut p = props();
        p.time_delta = Time::from_seconds(1.0);
        let mut c = exec(p);
        c.complete_grant(Time::from_seconds(2.0));
        assert_eq!(
            c.next_allowed(Time::from_seconds(2.1)),
            Time::from_seconds(3.0)
        );
        assert_eq!(
            c.next_allowed(Time::from_seconds(5.0)),
            Time::from_seconds(5.0)
        );
    }

    #[test]
    fn period_snaps_up_with_offset() {
        let mut p = props();
        p.period = Time::from_seconds(1.0);
        p.offset = Time::from_seconds(0.25);
        let c = exec(p);
        assert_eq!(
            c.next_allowed(Time::from_seconds(0.3)),
            Time::from_seconds(1.25)
        );
        assert_eq!(
            c.next_allowed(Time::from_seconds(1.25)),
            Time::from_seconds(1.25)
        );
        assert_eq!(c.next_allowed(Time::from_seconds(0.25)), Time::from_seconds(0.25));
    }

    #[test]
    fn event_grants_skip_time_delta_but_keep_period() {
        let mut p = props();
        p.time_delta = Time::from_seconds(1.0);
        p.period = Time::from_seconds(0.5);
        let mut c = exec(p);
        c.complete_grant(Time::from_seconds(2.0));
        // An event right after the granted time wakes at the next grid
        // point, not a full time_delta later.
        assert_eq!(
            c.event_grant_time(Time::from_seconds(2.1)),
            Time::from_seconds(2.5)
        );
        // An event at or before the granted time repeats it.
        assert_eq!(
            c.event_grant_time(Time::from_seconds(1.0)),
            Time::from_seconds(2.0)
        );
    }

    #[test]
    fn contribution_is_granted_time_when_idle() {
        let mut c = exec(props());
        c.complete_grant(Time::from_seconds(4.0));
        assert_eq!(c.contribution(None), Time::from_seconds(4.0));
    }

    #[test]
    fn contribution_uses_request_when_outstanding() {
        let mut c = exec(props());
        c.complete_grant(Time::from_seconds(4.0));
        c.begin_request(Time::from_seconds(10.0));
        assert_eq!(c.contribution(None), Time::from_seconds(10.0));
    }

    #[test]
    fn pending_event_caps_contribution() {
        let mut c = exec(props());
        c.begin_request(Time::from_seconds(10.0));
        assert_eq!(
            c.contribution(Some(Time::from_seconds(2.5))),
            Time::from_seconds(2.5)
        );
    }

    #[test]
    fn uninterruptible_ignores_pending_events() {
        let mut p = props();
        p.uninterruptible = true;
        let mut c = exec(p);
        c.begin_request(Time::from_seconds(10.0));
        assert_eq!(
            c.contribution(Some(Time::from_seconds(2.5))),
            Time::from_seconds(10.0)
        );
    }

    #[test]
    fn output_delay_pushes_contribution_later() {
        let mut p = props();
        p.output_delay = Time::from_seconds(0.5);
        let mut c = exec(p);
        c.complete_grant(Time::from_seconds(1.0));
        assert_eq!(c.contribution(None), Time::from_seconds(1.5));
    }

    #[test]
    fn retired_coordinator_contributes_never() {
        let mut c = exec(props());
        c.retire();
        assert_eq!(c.contribution(None), Time::MAXTIME);
        assert_eq!(c.contribution(Some(Time::ZERO)), Time::MAXTIME);
    }

    #[test]
    fn maxtime_request_passes_through() {
        let c = exec(props());
        assert_eq!(c.next_allowed(Time::MAXTIME), Time::MAXTIME);
    }

    #[test]
    fn pre_execution_contribution_is_zero() {
        let c = TimeCoordinator::new(props());
        assert_eq!(c.contribution(None), Time::ZERO);
    }

    proptest! {
        #[test]
        fn next_allowed_never_lowers(
            candidate in 0i64..1_000_000_000,
            granted in 0i64..1_000_000_000,
            delta in 0i64..10_000_000,
            period in 0i64..10_000_000,
        ) {
            let mut p = TimeProperties::default();
            p.time_delta = Time::from_nanos(delta);
            p.period = Time::from_nanos(period);
            let mut c = exec(p);
            c.complete_grant(Time::from_nanos(granted));
            let t = c.next_allowed(Time::from_nanos(candidate));
            prop_assert!(t >= Time::from_nanos(candidate));
            prop_assert!(t >= Time::from_nanos(granted + delta));
        }

        #[test]
        fn snapped_times_land_on_the_grid(
            candidate in 0i64..1_000_000_000,
            period in 1i64..10_000_000,
            offset_frac in 0i64..1_000_000,
        ) {
            let offset = offset_frac % period;
            let mut p = TimeProperties::default();
            p.period = Time::from_nanos(period);
            p.offset = Time::from_nanos(offset);
            let c = exec(p);
            let t = c.next_allowed(Time::from_nanos(candidate));
            prop_assert_eq!((t.as_nanos() - offset).rem_euclid(period), 0);
        }
    }
}
