//! Routing decisions and drop reasons

use serde::{Deserialize, Serialize};

use crate::identity::NodeId;

/// Why a packet was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DropReason {
    /// Hop budget exhausted before reaching the destination
    TtlExpired,
    /// No live peer other than the sender to forward to
    NoRoute,
    /// Empty identities or oversized payload
    MalformedPacket,
    /// The transmit path was closed or full
    TransportUnavailable,
    /// Addressed to this node but nothing is registered to receive it
    NoReceiver,
}

impl DropReason {
    /// Number of distinct reasons
    pub const COUNT: usize = 5;

    /// Every reason, in a stable order (used for per-reason counters)
    pub const ALL: [DropReason; Self::COUNT] = [
        DropReason::TtlExpired,
        DropReason::NoRoute,
        DropReason::MalformedPacket,
        DropReason::TransportUnavailable,
        DropReason::NoReceiver,
    ];

    /// Position of this reason in [`DropReason::ALL`]
    pub fn index(self) -> usize {
        match self {
            DropReason::TtlExpired => 0,
            DropReason::NoRoute => 1,
            DropReason::MalformedPacket => 2,
            DropReason::TransportUnavailable => 3,
            DropReason::NoReceiver => 4,
        }
    }
}

/// Possible outcomes of routing a packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoutingDecision {
    /// Hand the packet to this node's receive callback
    Deliver,

    /// Transmit to a single neighbor
    Forward {
        /// The chosen neighbor
        next_hop: NodeId,
    },

    /// Drop the packet
    Drop {
        /// Why the packet should be dropped
        reason: DropReason,
    },
}

impl RoutingDecision {
    /// Create a forward decision
    pub fn forward(next_hop: NodeId) -> Self {
        Self::Forward { next_hop }
    }

    /// Create a drop decision
    pub fn drop(reason: DropReason) -> Self {
        Self::Drop { reason }
    }

    /// Check if this is a local delivery decision
    pub fn is_delivery(&self) -> bool {
        matches!(self, Self::Deliver)
    }

    /// Check if this is a forward decision
    pub fn is_forward(&self) -> bool {
        matches!(self, Self::Forward { .. })
    }

    /// Check if this is a drop decision
    pub fn is_drop(&self) -> bool {
        matches!(self, Self::Drop { .. })
    }

    /// The drop reason, if this is a drop decision
    pub fn drop_reason(&self) -> Option<DropReason> {
        match self {
            Self::Drop { reason } => Some(*reason),
            _ => None,
        }
    }
}
