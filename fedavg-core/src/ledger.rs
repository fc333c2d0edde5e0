//! Network cost ledger
//!
//! Cumulative bytes sent to and received from the aggregator over the
//! lifetime of the process. Counters only grow and are never reset.

use core::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Point-in-time copy of the ledger counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostSnapshot {
    /// Total bytes uploaded
    pub sent: u64,
    /// Total bytes downloaded
    pub received: u64,
}

/// Thread-safe, monotonic byte counters
#[derive(Debug, Default)]
pub struct CostLedger {
    sent: AtomicU64,
    received: AtomicU64,
}

impl CostLedger {
    /// Create an empty ledger
    pub const fn new() -> Self {
        Self {
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
        }
    }

    /// Account for an outbound payload of `n` bytes
    pub fn record_sent(&self, n: usize) -> u64 {
        saturating_add(&self.sent, n)
    }

    /// Account for an inbound payload of `n` bytes
    pub fn record_received(&self, n: usize) -> u64 {
        saturating_add(&self.received, n)
    }

    /// Current totals
    pub fn snapshot(&self) -> CostSnapshot {
        CostSnapshot {
            sent: self.sent.load(Ordering::Acquire),
            received: self.received.load(Ordering::Acquire),
        }
    }
}

/// Returns the new total.
fn saturating_add(counter: &AtomicU64, n: usize) -> u64 {
    let n = n as u64;
    let prev = counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
            Some(cur.saturating_add(n))
        })
        .unwrap_or_else(|cur| cur);
    prev.saturating_add(n)
}
