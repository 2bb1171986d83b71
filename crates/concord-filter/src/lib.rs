//! Message filter operations and pipelines.
//!
//! Filters transform messages as they cross from a source endpoint
//! toward a destination. Each filter is a pure step producing new
//! message envelopes; an ordered chain of filters forms a
//! [`FilterPipeline`]. Delays are always expressed as later delivery
//! times, never by blocking the caller.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod filter;
pub mod pipeline;

pub use filter::{
    CloneFilter, DelayDistribution, DelayFilter, FilterOp, FilterOutcome, RandomDelayFilter,
    RerouteFilter,
};
pub use pipeline::FilterPipeline;
