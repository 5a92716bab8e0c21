//! Router counters

use std::sync::atomic::{AtomicU64, Ordering};

use gridmesh_core::DropReason;
use serde::{Deserialize, Serialize};

/// Live counters updated by the router
#[derive(Debug, Default)]
pub struct RouterStats {
    enqueued: AtomicU64,
    rejected: AtomicU64,
    delivered: AtomicU64,
    forwarded: AtomicU64,
    dropped: [AtomicU64; DropReason::COUNT],
}

impl RouterStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self, reason: DropReason) {
        self.dropped[reason.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// Drops recorded for one reason
    pub fn dropped(&self, reason: DropReason) -> u64 {
        self.dropped[reason.index()].load(Ordering::Relaxed)
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> RouterStatsSnapshot {
        let dropped = DropReason::ALL
            .iter()
            .map(|reason| (*reason, self.dropped(*reason)))
            .filter(|(_, count)| *count > 0)
            .collect();

        RouterStatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            dropped,
        }
    }
}

/// Router statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterStatsSnapshot {
    /// Packets accepted into the queue
    pub enqueued: u64,
    /// Packets refused with `QueueFull`
    pub rejected: u64,
    /// Packets handed to the local receiver
    pub delivered: u64,
    /// Packets handed to the transmit path
    pub forwarded: u64,
    /// Non-zero drop counts by reason
    pub dropped: Vec<(DropReason, u64)>,
}

impl RouterStatsSnapshot {
    /// Drops recorded for one reason
    pub fn dropped_for(&self, reason: DropReason) -> u64 {
        self.dropped
            .iter()
            .find(|(r, _)| *r == reason)
            .map(|(_, count)| *count)
            .unwrap_or(0)
    }

    /// Total drops across every reason
    pub fn total_dropped(&self) -> u64 {
        self.dropped.iter().map(|(_, count)| count).sum()
    }
}
