//! # GridMesh Routing
//!
//! Membership and forwarding for a GridMesh node.
//!
//! ## Core Components
//!
//! - [`PeerTable`]: Live neighbors learned from beacons, with expiry
//! - [`PacketQueue`]: Bounded FIFO of packets awaiting a decision
//! - [`PacketRouter`]: Pops packets and applies the forwarding decision
//! - [`route_packet`]: The decision itself, as a pure function
//!
//! ## Routing Algorithm
//!
//! Each packet is decided exactly once:
//!
//! 1. **MALFORMED**: Empty identities or oversized payload are dropped
//! 2. **DELIVER**: Addressed to this node (or to the backend on a gateway)
//! 3. **TTL**: A packet with no hops left is dropped
//! 4. **FORWARD**: To the destination if it is a live neighbor, otherwise
//!    to the lowest live peer that is neither the source nor this node
//! 5. **DROP**: No eligible peer means no route
//!
//! Forwarded packets leave through a bounded transmit channel, so
//! [`PacketRouter::process_one`] never waits on the network.
//!
//! ## Example
//!
//! ```rust,ignore
//! use gridmesh_routing::{PacketRouter, PeerTable};
//!
//! let peers = Arc::new(PeerTable::new(Duration::from_secs(90)));
//! let router = PacketRouter::new(local_id, false, peers.clone(), 1000);
//! router.attach_transmit(tx);
//!
//! router.enqueue(packet)?;
//! match router.process_one(Instant::now()) {
//!     Some(Disposition::Forwarded { next_hop, .. }) => { /* on its way */ }
//!     Some(other) => { /* delivered or dropped */ }
//!     None => { /* queue empty */ }
//! }
//! ```

pub mod error;
pub mod peers;
pub mod queue;
pub mod router;
pub mod stats;

// Re-export main types
pub use error::{RoutingError, RoutingResult};
pub use peers::{Peer, PeerTable};
pub use queue::{DEFAULT_QUEUE_CAPACITY, PacketQueue};
pub use router::{
    Delivery, DeliveryHandler, Disposition, Outbound, PacketRouter, route_packet,
};
pub use stats::{RouterStats, RouterStatsSnapshot};

// Re-export core routing types for convenience
pub use gridmesh_core::{DropReason, RoutingDecision};
