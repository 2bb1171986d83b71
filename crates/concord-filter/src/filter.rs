//! The [`FilterOp`] trait and the built-in filter operations.

use concord_core::{Message, Time};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

/// Result of applying one filter step to a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FilterOutcome {
    /// The message continues, possibly transformed.
    Pass(Message),
    /// The message fanned out into several independent messages, each
    /// subsequently filterable by the remaining chain.
    Fanout(Vec<Message>),
    /// The message is consumed and nothing continues.
    Drop,
}

/// A single transformation step in a filter pipeline.
///
/// # Contract
///
/// - `apply()` never blocks: a filter that wants to delay a message
///   expresses the delay as a later `delivery_time`.
/// - `apply()` never mutates its input in place; it builds new envelopes
///   (the [`Message`] helpers make this cheap).
/// - `&mut self` exists only for internal state such as a seeded RNG;
///   given the same seed and the same message sequence, a filter must
///   produce the same outcomes.
///
/// The trait is object-safe; pipelines store `Box<dyn FilterOp>`.
pub trait FilterOp: Send + 'static {
    /// Human-readable name for diagnostics.
    fn name(&self) -> &str;

    /// Apply this filter to one in-flight message.
    fn apply(&mut self, msg: Message) -> FilterOutcome;
}

// ── DelayFilter ─────────────────────────────────────────────────

/// Pushes delivery later by a fixed amount.
///
/// `delivery_time = max(delivery_time, send_time) + delay`.
#[derive(Clone, Debug)]
pub struct DelayFilter {
    name: String,
    delay: Time,
}

impl DelayFilter {
    /// Create a fixed-delay filter. Negative delays are clamped to zero
    /// (delivery never precedes the send time).
    pub fn new(name: &str, delay: Time) -> Self {
        Self {
            name: name.to_string(),
            delay: delay.max(Time::ZERO),
        }
    }
}

impl FilterOp for DelayFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&mut self, msg: Message) -> FilterOutcome {
        FilterOutcome::Pass(msg.delayed_by(self.delay))
    }
}

// ── RandomDelayFilter ───────────────────────────────────────────

/// Distribution from which a [`RandomDelayFilter`] samples its delay.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DelayDistribution {
    /// Uniform over `[min, max]`.
    Uniform {
        /// Lower bound.
        min: Time,
        /// Upper bound.
        max: Time,
    },
    /// Exponential with the given mean.
    Exponential {
        /// Mean delay.
        mean: Time,
    },
}

/// Pushes delivery later by a randomly sampled amount.
///
/// The delay is sampled at send time from the configured distribution
/// using a `ChaCha8Rng` seeded at construction, so re-runs with the same
/// seed and message sequence reproduce identical delivery times.
#[derive(Clone, Debug)]
pub struct RandomDelayFilter {
    name: String,
    distribution: DelayDistribution,
    rng: ChaCha8Rng,
}

impl RandomDelayFilter {
    /// Create a random-delay filter with an explicit seed.
    pub fn new(name: &str, distribution: DelayDistribution, seed: u64) -> Self {
        Self {
            name: name.to_string(),
            distribution,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    fn sample(&mut self) -> Time {
        match self.distribution {
            DelayDistribution::Uniform { min, max } => {
                let lo = min.as_nanos().max(0);
                let hi = max.as_nanos().max(lo);
                if lo == hi {
                    Time::from_nanos(lo)
                } else {
                    Time::from_nanos(self.rng.random_range(lo..=hi))
                }
            }
            DelayDistribution::Exponential { mean } => {
                let mean_ns = mean.as_nanos().max(0) as f64;
                // Inverse-CDF sampling; avoids ln(0).
                let u: f64 = self.rng.random::<f64>().max(1e-300);
                Time::from_nanos((-mean_ns * u.ln()).round() as i64)
            }
        }
    }
}

impl FilterOp for RandomDelayFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&mut self, msg: Message) -> FilterOutcome {
        let delay = self.sample();
        FilterOutcome::Pass(msg.delayed_by(delay))
    }
}

// ── RerouteFilter ───────────────────────────────────────────────

/// Rewrites the destination endpoint, preserving `original_dest`.
#[derive(Clone, Debug)]
pub struct RerouteFilter {
    name: String,
    new_dest: String,
}

impl RerouteFilter {
    /// Create a reroute filter targeting `new_dest`.
    pub fn new(name: &str, new_dest: &str) -> Self {
        Self {
            name: name.to_string(),
            new_dest: new_dest.to_string(),
        }
    }
}

impl FilterOp for RerouteFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&mut self, msg: Message) -> FilterOutcome {
        FilterOutcome::Pass(msg.rerouted_to(&self.new_dest))
    }
}

// ── CloneFilter ─────────────────────────────────────────────────

/// Emits the original message plus an independent copy per extra
/// destination.
///
/// Copies keep the original's `original_dest`; each copy is then
/// independently transformed by the rest of the chain.
#[derive(Clone, Debug)]
pub struct CloneFilter {
    name: String,
    extra_dests: Vec<String>,
}

impl CloneFilter {
    /// Create a clone filter fanning out to the given extra destinations.
    pub fn new(name: &str, extra_dests: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            extra_dests,
        }
    }
}

impl FilterOp for CloneFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&mut self, msg: Message) -> FilterOutcome {
        if self.extra_dests.is_empty() {
            return FilterOutcome::Pass(msg);
        }
        let mut out = Vec::with_capacity(1 + self.extra_dests.len());
        for dest in &self.extra_dests {
            out.push(msg.rerouted_to(dest));
        }
        out.push(msg);
        FilterOutcome::Fanout(out)
    }
}
