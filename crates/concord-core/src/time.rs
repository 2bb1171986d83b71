//! Simulation time as signed fixed-point nanoseconds.
//!
//! [`Time`] is a totally ordered value type with two sentinels:
//! [`Time::MINTIME`] ("not yet granted") and [`Time::MAXTIME`] ("never").
//! Arithmetic saturates at the sentinels rather than wrapping, and the
//! sentinels are absorbing: adding any finite delta to `MAXTIME` yields
//! `MAXTIME`.

use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub};

/// Nanoseconds per second, as the fixed-point scale factor.
const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Seconds beyond which a floating-point conversion maps to a sentinel.
const SENTINEL_SECONDS: f64 = 1e12;

/// A simulation time in signed fixed-point nanoseconds.
///
/// Construct via [`Time::from_nanos`] or [`Time::from_seconds`]. The type
/// is `Copy` and totally ordered; the engine relies on both properties for
/// grant bookkeeping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Time(i64);

impl Time {
    /// Time zero — the starting granted time after entering execution.
    pub const ZERO: Time = Time(0);

    /// The smallest representable positive increment (one nanosecond).
    pub const EPSILON: Time = Time(1);

    /// Positive sentinel: "never". Absorbing under addition.
    pub const MAXTIME: Time = Time(i64::MAX);

    /// Negative sentinel: "not yet granted". Absorbing under subtraction.
    ///
    /// One above `i64::MIN` so negation cannot overflow.
    pub const MINTIME: Time = Time(i64::MIN + 1);

    /// Construct from a raw nanosecond count.
    pub const fn from_nanos(ns: i64) -> Time {
        Time(ns)
    }

    /// The raw nanosecond count.
    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    /// Construct from floating-point seconds, rounding to the nearest
    /// nanosecond.
    ///
    /// Values beyond ±1e12 seconds (including the infinities) map to the
    /// corresponding sentinel; NaN maps to [`Time::MINTIME`].
    pub fn from_seconds(secs: f64) -> Time {
        if secs.is_nan() || secs < -SENTINEL_SECONDS {
            Time::MINTIME
        } else if secs > SENTINEL_SECONDS {
            Time::MAXTIME
        } else {
            Time((secs * NANOS_PER_SEC as f64).round() as i64)
        }
    }

    /// The value in floating-point seconds. Sentinels map to ±1e49.
    pub fn to_seconds(self) -> f64 {
        if self == Time::MAXTIME {
            1e49
        } else if self <= Time::MINTIME {
            -1e49
        } else {
            self.0 as f64 / NANOS_PER_SEC as f64
        }
    }

    /// Whether this is the positive "never" sentinel.
    pub const fn is_max(self) -> bool {
        self.0 == i64::MAX
    }

    /// Whether this is at or below the negative "not yet granted" sentinel.
    pub const fn is_min(self) -> bool {
        self.0 <= i64::MIN + 1
    }

    /// Saturating addition that preserves sentinels.
    ///
    /// If either operand is a sentinel the result is that sentinel
    /// (`MAXTIME` wins when both appear).
    pub fn saturating_add(self, rhs: Time) -> Time {
        if self.is_max() || rhs.is_max() {
            Time::MAXTIME
        } else if self.is_min() || rhs.is_min() {
            Time::MINTIME
        } else {
            Time(self.0.saturating_add(rhs.0).clamp(i64::MIN + 1, i64::MAX))
        }
    }

    /// Saturating subtraction that preserves sentinels.
    pub fn saturating_sub(self, rhs: Time) -> Time {
        if self.is_max() {
            Time::MAXTIME
        } else if self.is_min() || rhs.is_max() {
            Time::MINTIME
        } else {
            Time(self.0.saturating_sub(rhs.0).clamp(i64::MIN + 1, i64::MAX))
        }
    }

}

impl Add for Time {
    type Output = Time;

    fn add(self, rhs: Time) -> Time {
        self.saturating_add(rhs)
    }
}

impl AddAssign for Time {
    fn add_assign(&mut self, rhs: Time) {
        *self = self.saturating_add(rhs);
    }
}

impl Sub for Time {
    type Output = Time;

    fn sub(self, rhs: Time) -> Time {
        self.saturating_sub(rhs)
    }
}

impl Neg for Time {
    type Output = Time;

    fn neg(self) -> Time {
        if self.is_max() {
            Time::MINTIME
        } else if self.is_min() {
            Time::MAXTIME
        } else {
            Time(-self.0)
        }
    }
}

impl From<i64> for Time {
    fn from(ns: i64) -> Time {
        Time(ns)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_max() {
            write!(f, "maxtime")
        } else if self.is_min() {
            write!(f, "mintime")
        } else {
            write!(f, "{}s", self.to_seconds())
        }
    }
}
