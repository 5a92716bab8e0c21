//! Live neighbor tracking
//!
//! The [`PeerTable`] is the node's only view of who is in radio range. It is
//! fed by beacons and drained by expiry; a peer that has not been heard from
//! for longer than the expiry window is gone.

use std::time::Duration;

use dashmap::DashMap;
use gridmesh_core::NodeId;
use tokio::time::Instant;

/// A neighbor learned from beacons
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    /// The neighbor's identity
    pub id: NodeId,
    /// When the first beacon from this neighbor arrived
    pub first_seen: Instant,
    /// When the latest beacon arrived
    pub last_seen: Instant,
    /// Beacons received since first seen
    pub beacons: u64,
}

impl Peer {
    fn new(id: NodeId, now: Instant) -> Self {
        Self {
            id,
            first_seen: now,
            last_seen: now,
            beacons: 1,
        }
    }

    /// Check if this peer has outlived the expiry window at `now`
    pub fn is_expired(&self, now: Instant, expiry_window: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > expiry_window
    }
}

/// Table of live neighbors
///
/// Each upsert and removal is atomic per key, so concurrent beacon handling
/// and expiry sweeps never observe a half-updated entry.
pub struct PeerTable {
    /// Peers indexed by identity
    peers: DashMap<NodeId, Peer>,
    /// Silence after which a peer is considered gone
    expiry_window: Duration,
}

impl PeerTable {
    /// Create an empty table
    pub fn new(expiry_window: Duration) -> Self {
        Self {
            peers: DashMap::new(),
            expiry_window,
        }
    }

    /// Insert a peer or refresh its `last_seen`
    ///
    /// Returns `true` if the peer was not in the table before. Timestamps
    /// never move backwards: a late-arriving older `now` leaves `last_seen`
    /// untouched.
    pub fn upsert(&self, id: NodeId, now: Instant) -> bool {
        let mut inserted = false;
        let key = id.clone();
        self.peers
            .entry(id)
            .and_modify(|peer| {
                peer.last_seen = peer.last_seen.max(now);
                peer.beacons += 1;
            })
            .or_insert_with(|| {
                inserted = true;
                Peer::new(key, now)
            });
        inserted
    }

    /// Remove every peer silent for longer than the expiry window
    ///
    /// Returns the removed identities in ascending order.
    pub fn expire(&self, now: Instant) -> Vec<NodeId> {
        let stale: Vec<NodeId> = self
            .peers
            .iter()
            .filter(|entry| entry.value().is_expired(now, self.expiry_window))
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = Vec::with_capacity(stale.len());
        for id in stale {
            // Re-check under the shard lock; a beacon may have landed in between
            if self
                .peers
                .remove_if(&id, |_, peer| peer.is_expired(now, self.expiry_window))
                .is_some()
            {
                removed.push(id);
            }
        }
        removed.sort();
        removed
    }

    /// Copy of the current entries, sorted by identity
    pub fn snapshot(&self) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self.peers.iter().map(|e| e.value().clone()).collect();
        peers.sort_by(|a, b| a.id.cmp(&b.id));
        peers
    }

    /// Identities of the current entries, sorted
    pub fn live_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.peers.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Look up a single peer
    pub fn get(&self, id: &NodeId) -> Option<Peer> {
        self.peers.get(id).map(|e| e.value().clone())
    }

    /// Number of peers in the table
    pub fn size(&self) -> usize {
        self.peers.len()
    }

    /// Check if a peer is in the table
    pub fn contains(&self, id: &NodeId) -> bool {
        self.peers.contains_key(id)
    }

    /// The configured expiry window
    pub fn expiry_window(&self) -> Duration {
        self.expiry_window
    }

    /// Forget every peer
    pub fn clear(&self) {
        self.peers.clear();
    }
}
