//! Application packets carried across the mesh

use std::fmt::Display;
use std::hash::{Hash, Hasher};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::identity::{Destination, NodeId};

/// Default hop budget for new packets
pub const DEFAULT_TTL: u8 = 64;

/// Largest payload a packet may carry
///
/// Leaves room for the frame header so a full packet fits in one UDP
/// datagram.
pub const MAX_PAYLOAD_SIZE: usize = 64_000;

/// Unique identifier for a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PacketId {
    /// Hash of the node that created this packet
    pub source_hash: u64,
    /// Sequence number from the source
    pub sequence: u64,
}

impl PacketId {
    /// Create a new packet ID
    pub fn new(source_hash: u64, sequence: u64) -> Self {
        Self {
            source_hash,
            sequence,
        }
    }

    /// Create the ID for the `sequence`-th packet sent by `source`
    pub fn for_source(source: &NodeId, sequence: u64) -> Self {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        source.hash(&mut hasher);
        Self::new(hasher.finish(), sequence)
    }
}

impl Display for PacketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04x}#{}", self.source_hash & 0xFFFF, self.sequence)
    }
}

/// A packet for hop-by-hop delivery
///
/// Everything except `ttl` is fixed at creation. `ttl` is decremented exactly
/// once per forwarding hop and, being unsigned, can never go negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    /// Unique packet identifier
    pub id: PacketId,
    /// Original sender
    pub source: NodeId,
    /// Final destination
    pub dest: Destination,
    /// Application payload
    pub payload: Bytes,
    /// Remaining hop budget
    pub ttl: u8,
}

impl Packet {
    /// Create a new packet with the default TTL
    pub fn new(id: PacketId, source: NodeId, dest: Destination, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            source,
            dest,
            payload: payload.into(),
            ttl: DEFAULT_TTL,
        }
    }

    /// Create a packet with custom TTL
    pub fn with_ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    /// Decrement TTL, returns false if the packet has no hops left
    pub fn decrement_ttl(&mut self) -> bool {
        if self.ttl == 0 {
            return false;
        }
        self.ttl -= 1;
        true
    }

    /// Check if this packet is well formed
    ///
    /// Packets built locally always are. Packets decoded from a frame can
    /// carry an empty source or destination, or an oversized payload.
    pub fn is_well_formed(&self) -> bool {
        if !self.source.is_valid() {
            return false;
        }
        if let Destination::Node(dest) = &self.dest {
            if !dest.is_valid() {
                return false;
            }
        }
        self.payload.len() <= MAX_PAYLOAD_SIZE
    }
}
