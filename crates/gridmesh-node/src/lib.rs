//! # GridMesh Node
//!
//! The mesh node coordinator.
//!
//! [`MeshNode`] ties together:
//! - A [`MeshTransport`] (UDP over batman-adv, or the in-memory mock)
//! - The [`PeerTable`] fed by the [`BeaconService`]
//! - The [`PacketRouter`] that decides every packet's fate
//!
//! ## Background Tasks
//!
//! `start` spawns four owned tasks, all stopped by one shutdown signal:
//!
//! - **beacon**: broadcasts our identity every `beacon_interval`
//! - **inbound**: decodes frames from the transport into beacons and packets
//! - **transmit**: sends forwarded packets to their next hop
//! - **sweep**: expires silent peers every `expiry_window / 2`
//!
//! Packet processing is not a task of its own: the owner calls
//! [`MeshNode::process_packets`] (or [`MeshNode::drain`]) from its
//! scheduling loop.
//!
//! ## Example
//!
//! ```rust,ignore
//! use gridmesh_node::{MeshNode, NodeConfig};
//!
//! let config = NodeConfig::default().with_identity("n1");
//! let transport = UdpMeshTransport::bind(config.resolve_identity()?, &config.transport).await?;
//! let node = MeshNode::new(config, Arc::new(transport))?;
//!
//! node.on_receive(|delivery| println!("{:?}", delivery.packet));
//! node.start().await?;
//!
//! node.send(Destination::Backend, b"{\"w\":42}".to_vec())?;
//! node.process_packets();
//! ```

mod config;
mod error;
pub mod beacon;

pub use beacon::{BeaconService, BeaconStats};
pub use config::{DEFAULT_IDENTITY_PREFIX, NodeConfig};
pub use error::{NodeError, NodeResult};

// Re-export the types callers need to drive a node
pub use gridmesh_core::{Destination, DropReason, NodeId, Packet, PacketId};
pub use gridmesh_routing::{Delivery, Disposition, Peer, PeerTable, RouterStatsSnapshot};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use gridmesh_core::{
    Clock, Frame, MAX_PAYLOAD_SIZE, MeshTransport, SystemClock, decode_frame, encode_frame,
};
use gridmesh_routing::{DeliveryHandler, Outbound, PacketRouter};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, instrument, trace, warn};

/// Capacity of the channel between the router and the transmit task
const TRANSMIT_CHANNEL_CAPACITY: usize = 1024;

/// Pause after a transport receive error before trying again
const RECV_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Node statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStats {
    /// Live peers right now
    pub peers: usize,
    /// Packets waiting in the queue
    pub queued: usize,
    /// Router counters
    pub router: RouterStatsSnapshot,
    /// Beacon counters
    pub beacons: BeaconStats,
    /// Data frames handed to the transport
    pub transmitted: u64,
    /// Data frames the transport refused
    pub transmit_failed: u64,
    /// Inbound datagrams that did not decode
    pub undecodable: u64,
}

#[derive(Debug, Default)]
struct LinkCounters {
    transmitted: AtomicU64,
    transmit_failed: AtomicU64,
    undecodable: AtomicU64,
}

/// A GridMesh node
///
/// Owns one identity for its whole lifetime. All public operations take
/// `&self` and are safe to call from any task.
pub struct MeshNode {
    /// Node configuration
    config: NodeConfig,
    /// Our identity
    identity: NodeId,
    /// The mesh link
    transport: Arc<dyn MeshTransport>,
    /// Time source for liveness decisions
    clock: Arc<dyn Clock>,
    /// Live neighbors
    peers: Arc<PeerTable>,
    /// Queue and forwarding decisions
    router: Arc<PacketRouter>,
    /// Beacon send and receive
    beacon: Arc<BeaconService>,
    /// Sequence number for the next packet we originate
    next_sequence: AtomicU64,
    /// Transport-level counters
    link: Arc<LinkCounters>,
    /// Shutdown signal sender
    shutdown_tx: broadcast::Sender<()>,
    /// Background task handles
    background_tasks: RwLock<Vec<JoinHandle<()>>>,
    /// Whether the node has been started
    started: AtomicBool,
}

impl MeshNode {
    /// Create a node on top of a transport
    ///
    /// The node's identity is the transport's. A configured `identity_seed`
    /// must agree with it.
    #[instrument(skip(config, transport), fields(node = %transport.local_id()))]
    pub fn new(config: NodeConfig, transport: Arc<dyn MeshTransport>) -> NodeResult<Self> {
        Self::with_clock(config, transport, Arc::new(SystemClock))
    }

    /// Create a node with a custom time source
    pub fn with_clock(
        config: NodeConfig,
        transport: Arc<dyn MeshTransport>,
        clock: Arc<dyn Clock>,
    ) -> NodeResult<Self> {
        config.validate()?;

        let identity = transport.local_id().clone();
        if let Some(seed) = &config.identity_seed {
            if seed.as_str() != identity.as_str() {
                return Err(NodeError::Config(format!(
                    "identity_seed '{}' does not match transport identity '{}'",
                    seed, identity
                )));
            }
        }

        let peers = Arc::new(PeerTable::new(config.expiry_window()));
        let router = Arc::new(PacketRouter::new(
            identity.clone(),
            config.gateway,
            peers.clone(),
            config.queue_capacity,
        ));
        let beacon = Arc::new(BeaconService::new(
            identity.clone(),
            transport.clone(),
            peers.clone(),
        ));
        let (shutdown_tx, _) = broadcast::channel(1);

        info!(
            identity = %identity.short_id(),
            gateway = config.gateway,
            "Node created"
        );

        Ok(Self {
            config,
            identity,
            transport,
            clock,
            peers,
            router,
            beacon,
            next_sequence: AtomicU64::new(0),
            link: Arc::new(LinkCounters::default()),
            shutdown_tx,
            background_tasks: RwLock::new(Vec::new()),
            started: AtomicBool::new(false),
        })
    }

    /// Start the node
    ///
    /// Begins beaconing, listening for frames, and transmitting forwarded
    /// packets. The peer table starts empty.
    #[instrument(skip(self), fields(node = %self.identity))]
    pub async fn start(&self) -> NodeResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(NodeError::AlreadyStarted);
        }

        self.peers.clear();

        let (transmit_tx, transmit_rx) = mpsc::channel(TRANSMIT_CHANNEL_CAPACITY);
        self.router.attach_transmit(transmit_tx);

        let beacon_task = self
            .beacon
            .clone()
            .spawn(self.config.beacon_interval(), self.shutdown_tx.subscribe());
        let inbound_task = self.spawn_inbound();
        let transmit_task = self.spawn_transmit(transmit_rx);
        let sweep_task = self.spawn_sweep();

        {
            let mut tasks = self.background_tasks.write().await;
            tasks.push(beacon_task);
            tasks.push(inbound_task);
            tasks.push(transmit_task);
            tasks.push(sweep_task);
        }

        info!("Node started");
        Ok(())
    }

    /// Stop the node
    ///
    /// Cancels every background task and waits for it to finish, then drops
    /// whatever is still queued.
    #[instrument(skip(self), fields(node = %self.identity))]
    pub async fn stop(&self) -> NodeResult<()> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Err(NodeError::NotStarted);
        }

        // Signal shutdown
        let _ = self.shutdown_tx.send(());
        self.router.detach_transmit();

        // Wait for background tasks
        let mut tasks = self.background_tasks.write().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }

        let dropped = self.router.clear();
        info!(dropped, "Node stopped");
        Ok(())
    }

    /// Queue a packet from this node to `dest`
    ///
    /// Works whether or not the node is started; the packet waits in the
    /// queue until the next [`process_packets`](Self::process_packets).
    pub fn send(
        &self,
        dest: impl Into<Destination>,
        payload: impl Into<Bytes>,
    ) -> NodeResult<PacketId> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(NodeError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let id = PacketId::for_source(&self.identity, sequence);
        let dest = dest.into();
        let packet = Packet::new(id, self.identity.clone(), dest.clone(), payload)
            .with_ttl(self.config.default_ttl);

        self.router.enqueue(packet)?;
        debug!(packet_id = %id, dest = %dest, "Packet queued");
        Ok(id)
    }

    /// Decide the fate of one queued packet
    ///
    /// Returns `None` when the queue is empty.
    pub fn process_packets(&self) -> Option<Disposition> {
        self.router.process_one(self.clock.now())
    }

    /// Process up to `max` queued packets, returning how many were processed
    pub fn drain(&self, max: usize) -> usize {
        let mut processed = 0;
        while processed < max && self.process_packets().is_some() {
            processed += 1;
        }
        processed
    }

    /// Register the local delivery callback
    ///
    /// Replaces any previous callback. Packets addressed to this node that
    /// arrive with no callback registered are dropped.
    pub fn on_receive<F>(&self, handler: F)
    where
        F: Fn(Delivery) + Send + Sync + 'static,
    {
        let handler: DeliveryHandler = Arc::new(handler);
        self.router.set_handler(handler);
    }

    /// Remove the local delivery callback
    pub fn clear_receive(&self) {
        self.router.clear_handler();
    }

    /// Our identity
    pub fn identity(&self) -> &NodeId {
        &self.identity
    }

    /// Copy of the live peer set, sorted by identity
    pub fn peers(&self) -> Vec<Peer> {
        self.peers.snapshot()
    }

    /// The shared peer table
    pub fn peer_table(&self) -> &Arc<PeerTable> {
        &self.peers
    }

    /// The beacon service
    pub fn beacon(&self) -> &Arc<BeaconService> {
        &self.beacon
    }

    /// Packets waiting in the queue
    pub fn queue_len(&self) -> usize {
        self.router.queue_len()
    }

    /// Check if the node is started
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Whether this node is a gateway to the backend
    pub fn is_gateway(&self) -> bool {
        self.config.gateway
    }

    /// Node configuration
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Current statistics
    pub fn stats(&self) -> NodeStats {
        NodeStats {
            peers: self.peers.size(),
            queued: self.router.queue_len(),
            router: self.router.stats().snapshot(),
            beacons: self.beacon.stats(),
            transmitted: self.link.transmitted.load(Ordering::Relaxed),
            transmit_failed: self.link.transmit_failed.load(Ordering::Relaxed),
            undecodable: self.link.undecodable.load(Ordering::Relaxed),
        }
    }

    fn spawn_inbound(&self) -> JoinHandle<()> {
        let transport = self.transport.clone();
        let beacon = self.beacon.clone();
        let router = self.router.clone();
        let clock = self.clock.clone();
        let link = self.link.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    result = transport.recv() => match result {
                        Ok(bytes) => {
                            handle_inbound(&bytes, &beacon, &router, clock.as_ref(), &link);
                        }
                        Err(e) => {
                            warn!(error = %e, "Transport receive error");
                            tokio::select! {
                                _ = shutdown_rx.recv() => break,
                                _ = tokio::time::sleep(RECV_ERROR_BACKOFF) => {}
                            }
                        }
                    },
                }
            }
            debug!("Inbound task shutting down");
        }
        .instrument(info_span!("inbound")))
    }

    fn spawn_transmit(&self, mut transmit_rx: mpsc::Receiver<Outbound>) -> JoinHandle<()> {
        let transport = self.transport.clone();
        let local = self.identity.clone();
        let link = self.link.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    outbound = transmit_rx.recv() => {
                        let Some(outbound) = outbound else { break };
                        transmit(transport.as_ref(), &local, outbound, &link).await;
                    }
                }
            }
            debug!("Transmit task shutting down");
        }
        .instrument(info_span!("transmit")))
    }

    fn spawn_sweep(&self) -> JoinHandle<()> {
        let peers = self.peers.clone();
        let clock = self.clock.clone();
        let period = (self.config.expiry_window() / 2).max(Duration::from_millis(1));
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        for lost in peers.expire(clock.now()) {
                            info!(peer = %lost, peers = peers.size(), "Peer lost");
                        }
                    }
                }
            }
            debug!("Sweep task shutting down");
        }
        .instrument(info_span!("sweep")))
    }
}

fn handle_inbound(
    bytes: &[u8],
    beacon: &BeaconService,
    router: &PacketRouter,
    clock: &dyn Clock,
    link: &LinkCounters,
) {
    let frame = match decode_frame(bytes) {
        Ok(frame) => frame,
        Err(e) => {
            link.undecodable.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, len = bytes.len(), "Discarding undecodable frame");
            return;
        }
    };

    let sender = frame.sender();
    let malformed_source = matches!(&frame, Frame::Data { packet, .. } if !packet.source.is_valid());
    if !sender.is_valid() || malformed_source {
        link.undecodable.fetch_add(1, Ordering::Relaxed);
        warn!(sender = ?sender.as_str(), "Discarding frame with malformed identity");
        return;
    }

    match frame {
        Frame::Beacon { sender } => {
            beacon.on_beacon_received(sender, clock.now());
        }
        Frame::Data { sender, packet } => {
            trace!(from = %sender, packet_id = %packet.id, ttl = packet.ttl, "Data frame received");
            // enqueue logs the rejection itself
            let _ = router.enqueue(packet);
        }
    }
}

async fn transmit(
    transport: &dyn MeshTransport,
    local: &NodeId,
    outbound: Outbound,
    link: &LinkCounters,
) {
    let Outbound { next_hop, packet } = outbound;
    let packet_id = packet.id;

    let frame = match encode_frame(&Frame::data(local.clone(), packet)) {
        Ok(frame) => frame,
        Err(e) => {
            link.transmit_failed.fetch_add(1, Ordering::Relaxed);
            warn!(packet_id = %packet_id, error = %e, "Failed to encode data frame");
            return;
        }
    };

    match transport.send_to(&next_hop, frame).await {
        Ok(()) => {
            link.transmitted.fetch_add(1, Ordering::Relaxed);
            trace!(packet_id = %packet_id, next_hop = %next_hop, "Data frame sent");
        }
        Err(e) => {
            link.transmit_failed.fetch_add(1, Ordering::Relaxed);
            warn!(
                packet_id = %packet_id,
                next_hop = %next_hop,
                error = %e,
                "Transmit failed, packet dropped"
            );
        }
    }
}
