//! Ordered filter chains.
//!
//! A [`FilterPipeline`] applies its filters left to right in
//! registration order. The whole pipeline is a pure function from one
//! message to zero or more messages: a delay step moves the delivery
//! time, a clone step fans out, a drop removes the message. All
//! computation completes before the results are considered in flight.

use concord_core::Message;
use smallvec::{smallvec, SmallVec};

use crate::filter::{FilterOp, FilterOutcome};

/// An ordered chain of filters attached to one endpoint side.
pub struct FilterPipeline {
    stages: Vec<Box<dyn FilterOp>>,
}

impl FilterPipeline {
    /// An empty pipeline (identity).
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Append a filter; appended order is application order.
    pub fn push(&mut self, filter: Box<dyn FilterOp>) {
        self.stages.push(filter);
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the pipeline has no stages.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run one message through the chain.
    ///
    /// Fanout from a clone stage feeds every copy through the remaining
    /// stages independently; relative order of copies is preserved.
    pub fn run(&mut self, msg: Message) -> SmallVec<[Message; 1]> {
        let mut current: SmallVec<[Message; 1]> = smallvec![msg];
        for stage in &mut self.stages {
            let mut next: SmallVec<[Message; 1]> = SmallVec::new();
            for m in current.drain(..) {
                match stage.apply(m) {
                    FilterOutcome::Pass(m) => next.push(m),
                    FilterOutcome::Fanout(ms) => next.extend(ms),
                    FilterOutcome::Drop => {}
                }
            }
            current = next;
            if current.is_empty() {
                break;
            }
        }
        current
    }

    /// Names of the stages in application order.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }
}

impl Default for FilterPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FilterPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterPipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}
