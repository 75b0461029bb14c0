//! Delivery counters for monitoring and tests

use std::sync::atomic::{AtomicU64, Ordering};

/// Engine-wide delivery metrics.
///
/// Updated with relaxed atomics from the send path, the receiver loop, and
/// the retransmission tasks.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Datagrams handed to the transport (first sends, retransmits, acks)
    pub datagrams_sent: AtomicU64,
    /// Datagrams successfully read from the transport
    pub datagrams_received: AtomicU64,
    /// Retransmissions of confirmable messages
    pub retransmissions: AtomicU64,
    /// Exchanges that exhausted retransmission without an acknowledgement
    pub delivery_timeouts: AtomicU64,
    /// Inbound datagrams the codec could not parse
    pub decode_failures: AtomicU64,
    /// Empty acknowledgements generated for separate responses
    pub acks_sent: AtomicU64,
}

impl EngineMetrics {
    pub fn record_send(&self) {
        self.datagrams_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_receive(&self) {
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retransmission(&self) {
        self.retransmissions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery_timeout(&self) {
        self.delivery_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ack_sent(&self) {
        self.acks_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a point-in-time snapshot of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            datagrams_sent: self.datagrams_sent.load(Ordering::Relaxed),
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            retransmissions: self.retransmissions.load(Ordering::Relaxed),
            delivery_timeouts: self.delivery_timeouts.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            acks_sent: self.acks_sent.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of the engine counters at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub datagrams_sent: u64,
    pub datagrams_received: u64,
    pub retransmissions: u64,
    pub delivery_timeouts: u64,
    pub decode_failures: u64,
    pub acks_sent: u64,
}
