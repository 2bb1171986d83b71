//! Counters accumulated by a core service thread.

/// Snapshot of a core's counters, retrievable through
/// [`Core::metrics`](crate::service::Core::metrics).
#[derive(Clone, Debug, Default)]
pub struct CoreMetrics {
    /// Time grants issued, including iterative regrants.
    pub grants_issued: u64,
    /// Grants issued earlier than requested because of a pending event.
    pub event_interrupts: u64,
    /// Grants that repeated the current time for iteration.
    pub iterations_granted: u64,
    /// Values accepted from local publishers.
    pub values_published: u64,
    /// Value deliveries queued for local inputs.
    pub values_delivered: u64,
    /// Messages accepted from local senders.
    pub messages_sent: u64,
    /// Messages queued for local endpoints.
    pub messages_delivered: u64,
    /// Messages consumed by a filter drop.
    pub messages_dropped: u64,
    /// Messages with no local owner and no upstream route.
    pub unroutable_messages: u64,
    /// Frames sent to the upstream broker.
    pub frames_sent: u64,
    /// Frames received from the upstream broker.
    pub frames_received: u64,
    /// Federates failed by the grant timeout.
    pub grant_timeouts: u64,
    /// Type disagreements recorded as warnings.
    pub type_mismatch_warnings: u64,
    /// Error notices received from the federation.
    pub error_notices: u64,
}
