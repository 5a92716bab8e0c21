//! Packet router
//!
//! The [`PacketRouter`] owns the packet queue and decides the fate of each
//! packet exactly once. The decision itself lives in [`route_packet`], a
//! pure function of the packet, the live peer snapshot, and this node's
//! identity.

use std::sync::Arc;

use gridmesh_core::{
    Destination, DropReason, NodeId, Packet, PacketId, RoutingDecision,
};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::error::{RoutingError, RoutingResult};
use crate::peers::PeerTable;
use crate::queue::PacketQueue;
use crate::stats::RouterStats;

/// A packet that reached its destination on this node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// The delivered packet
    pub packet: Packet,
}

/// Callback invoked on local delivery
pub type DeliveryHandler = Arc<dyn Fn(Delivery) + Send + Sync>;

/// A forwarded packet waiting for the transmit task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    /// The neighbor to transmit to
    pub next_hop: NodeId,
    /// The packet, with its ttl already decremented
    pub packet: Packet,
}

/// Terminal outcome of processing one packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Handed to the local receiver
    Delivered { packet_id: PacketId },
    /// Handed to the transmit path
    Forwarded {
        packet_id: PacketId,
        next_hop: NodeId,
        ttl: u8,
    },
    /// Discarded
    Dropped {
        packet_id: PacketId,
        reason: DropReason,
    },
}

impl Disposition {
    /// The packet this disposition applies to
    pub fn packet_id(&self) -> PacketId {
        match self {
            Self::Delivered { packet_id }
            | Self::Forwarded { packet_id, .. }
            | Self::Dropped { packet_id, .. } => *packet_id,
        }
    }

    /// The drop reason, if the packet was dropped
    pub fn drop_reason(&self) -> Option<DropReason> {
        match self {
            Self::Dropped { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// The chosen next hop, if the packet was forwarded
    pub fn next_hop(&self) -> Option<&NodeId> {
        match self {
            Self::Forwarded { next_hop, .. } => Some(next_hop),
            _ => None,
        }
    }
}

/// Decide what happens to a packet
///
/// `live_peers` must already be expired against the current time. The
/// result depends only on the arguments, so identical inputs always produce
/// identical decisions.
pub fn route_packet(
    packet: &Packet,
    live_peers: &[NodeId],
    local: &NodeId,
    gateway: bool,
) -> RoutingDecision {
    if !packet.is_well_formed() {
        return RoutingDecision::drop(DropReason::MalformedPacket);
    }

    let for_us = match &packet.dest {
        Destination::Node(dest) => dest == local,
        Destination::Backend => gateway,
    };
    if for_us {
        return RoutingDecision::Deliver;
    }

    if packet.ttl == 0 {
        return RoutingDecision::drop(DropReason::TtlExpired);
    }

    let candidates = live_peers
        .iter()
        .filter(|peer| *peer != &packet.source && *peer != local);

    // A live destination is reachable in one hop
    if let Destination::Node(dest) = &packet.dest {
        if let Some(direct) = candidates.clone().find(|peer| *peer == dest) {
            return RoutingDecision::forward(direct.clone());
        }
    }

    match candidates.min() {
        Some(next_hop) => RoutingDecision::forward(next_hop.clone()),
        None => RoutingDecision::drop(DropReason::NoRoute),
    }
}

/// Queue owner and forwarding engine
pub struct PacketRouter {
    /// This node's identity
    local: NodeId,
    /// Whether backend-bound packets terminate here
    gateway: bool,
    /// Live neighbors
    peers: Arc<PeerTable>,
    /// Packets awaiting a decision
    queue: PacketQueue,
    /// Local delivery callback
    handler: RwLock<Option<DeliveryHandler>>,
    /// Transmit path, present only while the node is running
    transmit: RwLock<Option<mpsc::Sender<Outbound>>>,
    /// Counters
    stats: RouterStats,
}

impl PacketRouter {
    /// Create a router
    pub fn new(local: NodeId, gateway: bool, peers: Arc<PeerTable>, capacity: usize) -> Self {
        Self {
            local,
            gateway,
            peers,
            queue: PacketQueue::new(capacity),
            handler: RwLock::new(None),
            transmit: RwLock::new(None),
            stats: RouterStats::new(),
        }
    }

    /// This node's identity
    pub fn local_id(&self) -> &NodeId {
        &self.local
    }

    /// Whether this node is a gateway to the backend
    pub fn is_gateway(&self) -> bool {
        self.gateway
    }

    /// The peer table consulted for decisions
    pub fn peers(&self) -> &Arc<PeerTable> {
        &self.peers
    }

    /// Register the local delivery callback, replacing any previous one
    pub fn set_handler(&self, handler: DeliveryHandler) {
        *self.handler.write() = Some(handler);
    }

    /// Remove the local delivery callback
    pub fn clear_handler(&self) {
        *self.handler.write() = None;
    }

    /// Connect the transmit channel
    pub fn attach_transmit(&self, tx: mpsc::Sender<Outbound>) {
        *self.transmit.write() = Some(tx);
    }

    /// Disconnect the transmit channel; later forwards are dropped
    pub fn detach_transmit(&self) {
        *self.transmit.write() = None;
    }

    /// Append a packet to the queue
    pub fn enqueue(&self, packet: Packet) -> RoutingResult<()> {
        let packet_id = packet.id;
        match self.queue.push(packet) {
            Ok(()) => {
                self.stats.record_enqueued();
                trace!(packet_id = %packet_id, queue_len = self.queue.len(), "Packet enqueued");
                Ok(())
            }
            Err(e @ RoutingError::QueueFull { .. }) => {
                self.stats.record_rejected();
                warn!(packet_id = %packet_id, error = %e, "Packet rejected");
                Err(e)
            }
        }
    }

    /// Decide the fate of the oldest queued packet
    ///
    /// Returns `None` if the queue is empty. Never waits: forwarded packets
    /// are handed to the transmit channel without blocking.
    pub fn process_one(&self, now: Instant) -> Option<Disposition> {
        let packet = self.queue.pop()?;

        for lost in self.peers.expire(now) {
            debug!(peer = %lost, "Peer lost");
        }
        let live = self.peers.live_ids();

        let decision = route_packet(&packet, &live, &self.local, self.gateway);
        let disposition = match decision {
            RoutingDecision::Deliver => self.deliver(packet),
            RoutingDecision::Forward { next_hop } => self.forward(packet, next_hop),
            RoutingDecision::Drop { reason } => self.drop_packet(&packet, reason),
        };
        Some(disposition)
    }

    fn deliver(&self, packet: Packet) -> Disposition {
        let handler = self.handler.read().clone();
        let Some(handler) = handler else {
            return self.drop_packet(&packet, DropReason::NoReceiver);
        };

        let packet_id = packet.id;
        debug!(
            packet_id = %packet_id,
            source = %packet.source,
            dest = %packet.dest,
            "Delivering packet locally"
        );
        handler(Delivery { packet });
        self.stats.record_delivered();
        Disposition::Delivered { packet_id }
    }

    fn forward(&self, mut packet: Packet, next_hop: NodeId) -> Disposition {
        // route_packet only forwards packets with ttl > 0
        packet.decrement_ttl();

        let tx = self.transmit.read().clone();
        let Some(tx) = tx else {
            return self.drop_packet(&packet, DropReason::TransportUnavailable);
        };

        let packet_id = packet.id;
        let ttl = packet.ttl;
        let outbound = Outbound {
            next_hop: next_hop.clone(),
            packet,
        };

        match tx.try_send(outbound) {
            Ok(()) => {
                self.stats.record_forwarded();
                debug!(packet_id = %packet_id, next_hop = %next_hop, ttl, "Forwarding packet");
                Disposition::Forwarded {
                    packet_id,
                    next_hop,
                    ttl,
                }
            }
            Err(e) => {
                let outbound = match e {
                    mpsc::error::TrySendError::Full(o) | mpsc::error::TrySendError::Closed(o) => o,
                };
                self.drop_packet(&outbound.packet, DropReason::TransportUnavailable)
            }
        }
    }

    fn drop_packet(&self, packet: &Packet, reason: DropReason) -> Disposition {
        self.stats.record_dropped(reason);
        match reason {
            DropReason::MalformedPacket | DropReason::TransportUnavailable => warn!(
                packet_id = %packet.id,
                source = %packet.source,
                reason = ?reason,
                "Dropping packet"
            ),
            _ => debug!(
                packet_id = %packet.id,
                dest = %packet.dest,
                ttl = packet.ttl,
                reason = ?reason,
                "Dropping packet"
            ),
        }
        Disposition::Dropped {
            packet_id: packet.id,
            reason,
        }
    }

    /// Number of queued packets
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Queue capacity
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Drop every queued packet
    pub fn clear(&self) -> usize {
        let discarded = self.queue.clear();
        if discarded > 0 {
            debug!(discarded, "Cleared packet queue");
        }
        discarded
    }

    /// Router counters
    pub fn stats(&self) -> &RouterStats {
        &self.stats
    }
}
