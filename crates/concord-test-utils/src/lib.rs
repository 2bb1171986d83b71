//! Test utilities and mock types for Concord development.
//!
//! Provides a recording mock of the [`FilterOp`] trait and fixture
//! builders for messages and time properties.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

mod fixtures;

pub use fixtures::{message_at, periodic, with_delays};

use std::sync::{Arc, Mutex};

use concord_core::Message;
use concord_filter::{FilterOp, FilterOutcome};

/// Mock filter that records every message it sees and passes it on
/// unchanged.
///
/// The record is behind an `Arc` so tests can keep a handle after the
/// filter is boxed into a pipeline; inspect it with
/// [`seen`](RecordingFilter::seen).
pub struct RecordingFilter {
    name: String,
    seen: Arc<Mutex<Vec<Message>>>,
}

impl RecordingFilter {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A handle to the recorded messages.
    pub fn log(&self) -> Arc<Mutex<Vec<Message>>> {
        Arc::clone(&self.seen)
    }

    /// Snapshot of the messages recorded so far.
    pub fn seen(&self) -> Vec<Message> {
        self.seen.lock().map(|log| log.clone()).unwrap_or_default()
    }
}

impl FilterOp for RecordingFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&mut self, message: Message) -> FilterOutcome {
        if let Ok(mut log) = self.seen.lock() {
            log.push(message.clone());
        }
        FilterOutcome::Pass(message)
    }
}

/// Filter that drops every message.
pub struct BlackholeFilter {
    name: String,
    pub dropped: u64,
}

impl BlackholeFilter {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            dropped: 0,
        }
    }
}

impl FilterOp for BlackholeFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&mut self, _message: Message) -> FilterOutcome {
        self.dropped += 1;
        FilterOutcome::Drop
    }
}
