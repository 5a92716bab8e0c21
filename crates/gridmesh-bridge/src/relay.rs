//! The bridge between the local bus, the mesh node, and the backend
//!
//! Two tasks run while the relay is started:
//!
//! - **bus consumer**: reads bus messages and turns matching ones into mesh
//!   packets via [`BridgeRelay::on_local_message`]
//! - **delivery**: takes packets the node delivered locally and hands them
//!   to the backend sink or back to the bus via
//!   [`BridgeRelay::on_mesh_delivery`]
//!
//! The node's receive callback runs inside `process_packets`, so it only
//! pushes into a bounded channel; all async work happens in the delivery
//! task.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use gridmesh_node::{Delivery, MeshNode, PacketId};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, instrument, trace, warn};

use crate::backend::{BackendRecord, BackendSink};
use crate::bus::LocalBus;
use crate::config::BridgeConfig;
use crate::envelope::BridgeEnvelope;
use crate::error::{BridgeError, BridgeResult};

/// Capacity of the channel between the node callback and the delivery task
const DELIVERY_CHANNEL_CAPACITY: usize = 256;

/// Bridge statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeStats {
    /// Bus messages sent onto the mesh
    pub forwarded: u64,
    /// Bus messages no rule matched
    pub unmatched: u64,
    /// Bus messages ignored because they were our own republishes
    pub looped: u64,
    /// Bus messages refused (bad payload or node refused the packet)
    pub rejected: u64,
    /// Bus messages lost because the consumer fell behind
    pub lagged: u64,
    /// Mesh deliveries handed to the backend
    pub backend_delivered: u64,
    /// Mesh deliveries the backend refused
    pub backend_failed: u64,
    /// Mesh deliveries put back on the bus
    pub republished: u64,
    /// Mesh deliveries that could not be handled
    pub delivery_errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    forwarded: AtomicU64,
    unmatched: AtomicU64,
    looped: AtomicU64,
    rejected: AtomicU64,
    lagged: AtomicU64,
    backend_delivered: AtomicU64,
    backend_failed: AtomicU64,
    republished: AtomicU64,
    delivery_errors: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> BridgeStats {
        BridgeStats {
            forwarded: self.forwarded.load(Ordering::Relaxed),
            unmatched: self.unmatched.load(Ordering::Relaxed),
            looped: self.looped.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            lagged: self.lagged.load(Ordering::Relaxed),
            backend_delivered: self.backend_delivered.load(Ordering::Relaxed),
            backend_failed: self.backend_failed.load(Ordering::Relaxed),
            republished: self.republished.load(Ordering::Relaxed),
            delivery_errors: self.delivery_errors.load(Ordering::Relaxed),
        }
    }
}

/// State shared between the relay handle and its tasks
struct RelayCore {
    config: BridgeConfig,
    node: Arc<MeshNode>,
    bus: Arc<dyn LocalBus>,
    backend: Option<Arc<dyn BackendSink>>,
    counters: Arc<Counters>,
}

impl RelayCore {
    fn on_local_message(&self, topic: &str, payload: &[u8]) -> BridgeResult<Option<PacketId>> {
        if self.config.is_republished(topic) {
            Counters::bump(&self.counters.looped);
            trace!(topic, "Ignoring republished message");
            return Ok(None);
        }

        let Some(rule) = self.config.rules.iter().find(|rule| rule.matches(topic)) else {
            Counters::bump(&self.counters.unmatched);
            trace!(topic, "No forwarding rule");
            return Ok(None);
        };

        match self.forward(rule.dest.clone(), rule.require_json, topic, payload) {
            Ok(packet_id) => {
                Counters::bump(&self.counters.forwarded);
                debug!(topic, dest = %rule.dest, packet_id = %packet_id, "Bus message forwarded");
                Ok(Some(packet_id))
            }
            Err(e) => {
                Counters::bump(&self.counters.rejected);
                Err(e)
            }
        }
    }

    fn forward(
        &self,
        dest: gridmesh_node::Destination,
        require_json: bool,
        topic: &str,
        payload: &[u8],
    ) -> BridgeResult<PacketId> {
        let envelope = BridgeEnvelope::from_bus(topic, payload)?;
        if require_json {
            envelope.ensure_json()?;
        }
        let bytes = envelope.encode()?;
        Ok(self.node.send(dest, bytes)?)
    }

    async fn on_mesh_delivery(&self, delivery: Delivery) -> BridgeResult<()> {
        let packet = delivery.packet;
        let envelope = match BridgeEnvelope::decode(&packet.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                Counters::bump(&self.counters.delivery_errors);
                return Err(e);
            }
        };

        if packet.dest.is_backend() {
            let Some(backend) = &self.backend else {
                Counters::bump(&self.counters.delivery_errors);
                return Err(BridgeError::Backend(
                    "no backend sink configured on this node".into(),
                ));
            };

            let record = BackendRecord::new(
                self.node.identity().clone(),
                packet.source.clone(),
                envelope.topic,
                envelope.payload.as_bytes(),
            );
            match backend.deliver(&record).await {
                Ok(()) => {
                    Counters::bump(&self.counters.backend_delivered);
                    debug!(source = %packet.source, topic = %record.topic, "Delivered to backend");
                    Ok(())
                }
                Err(e) => {
                    Counters::bump(&self.counters.backend_failed);
                    Err(e)
                }
            }
        } else {
            let topic = format!(
                "{}/{}/{}",
                self.config.republish_prefix, packet.source, envelope.topic
            );
            if let Err(e) = self.bus.publish(&topic, Bytes::from(envelope.payload)).await {
                Counters::bump(&self.counters.delivery_errors);
                return Err(e);
            }
            Counters::bump(&self.counters.republished);
            debug!(topic = %topic, "Republished mesh message");
            Ok(())
        }
    }
}

/// Relay between a [`LocalBus`], a [`MeshNode`], and an optional backend
///
/// The backend sink is only needed on gateway nodes: packets addressed to
/// `backend` are delivered locally only there.
pub struct BridgeRelay {
    core: Arc<RelayCore>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: RwLock<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl BridgeRelay {
    /// Create a relay
    pub fn new(
        config: BridgeConfig,
        node: Arc<MeshNode>,
        bus: Arc<dyn LocalBus>,
        backend: Option<Arc<dyn BackendSink>>,
    ) -> BridgeResult<Self> {
        config.validate()?;
        if node.is_gateway() && backend.is_none() {
            warn!("Gateway node has no backend sink; backend packets will be dropped");
        }

        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            core: Arc::new(RelayCore {
                config,
                node,
                bus,
                backend,
                counters: Arc::new(Counters::default()),
            }),
            shutdown_tx,
            tasks: RwLock::new(Vec::new()),
            started: AtomicBool::new(false),
        })
    }

    /// Start relaying
    ///
    /// Subscribes to every configured pattern, then starts the bus consumer
    /// and the delivery task and takes over the node's receive callback.
    #[instrument(skip(self), fields(node = %self.core.node.identity()))]
    pub async fn start(&self) -> BridgeResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(BridgeError::AlreadyStarted);
        }

        for pattern in &self.core.config.subscribe {
            if let Err(e) = self.core.bus.subscribe(pattern).await {
                self.started.store(false, Ordering::SeqCst);
                return Err(e);
            }
        }

        let (delivery_tx, delivery_rx) = mpsc::channel(DELIVERY_CHANNEL_CAPACITY);
        let counters = self.core.counters.clone();
        self.core.node.on_receive(move |delivery: Delivery| {
            if let Err(e) = delivery_tx.try_send(delivery) {
                Counters::bump(&counters.delivery_errors);
                warn!(error = %e, "Delivery channel full, packet dropped");
            }
        });

        let consumer = self.spawn_bus_consumer();
        let delivery = self.spawn_delivery(delivery_rx);
        {
            let mut tasks = self.tasks.write().await;
            tasks.push(consumer);
            tasks.push(delivery);
        }

        info!(
            patterns = self.core.config.subscribe.len(),
            rules = self.core.config.rules.len(),
            "Bridge started"
        );
        Ok(())
    }

    /// Stop relaying and wait for both tasks to finish
    #[instrument(skip(self), fields(node = %self.core.node.identity()))]
    pub async fn stop(&self) -> BridgeResult<()> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Err(BridgeError::NotStarted);
        }

        self.core.node.clear_receive();
        let _ = self.shutdown_tx.send(());

        let mut tasks = self.tasks.write().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }

        info!("Bridge stopped");
        Ok(())
    }

    /// Turn a bus message into a mesh packet
    ///
    /// Returns `Ok(None)` when the message is one of our own republishes or
    /// no rule matches it.
    pub fn on_local_message(&self, topic: &str, payload: &[u8]) -> BridgeResult<Option<PacketId>> {
        self.core.on_local_message(topic, payload)
    }

    /// Hand a locally delivered packet to the backend or the bus
    pub async fn on_mesh_delivery(&self, delivery: Delivery) -> BridgeResult<()> {
        self.core.on_mesh_delivery(delivery).await
    }

    /// Check if the relay is started
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// The relay configuration
    pub fn config(&self) -> &BridgeConfig {
        &self.core.config
    }

    /// Current statistics
    pub fn stats(&self) -> BridgeStats {
        self.core.counters.snapshot()
    }

    fn spawn_bus_consumer(&self) -> JoinHandle<()> {
        let core = self.core.clone();
        let mut messages = core.bus.messages();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    message = messages.recv() => match message {
                        Ok(message) => {
                            if let Err(e) = core.on_local_message(&message.topic, &message.payload) {
                                warn!(topic = %message.topic, error = %e, "Bus message not forwarded");
                            }
                        }
                        Err(RecvError::Lagged(missed)) => {
                            core.counters.lagged.fetch_add(missed, Ordering::Relaxed);
                            warn!(missed, "Bus consumer fell behind");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            debug!("Bus consumer shutting down");
        }
        .instrument(info_span!("bus_consumer")))
    }

    fn spawn_delivery(&self, mut delivery_rx: mpsc::Receiver<Delivery>) -> JoinHandle<()> {
        let core = self.core.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    delivery = delivery_rx.recv() => {
                        let Some(delivery) = delivery else { break };
                        let packet_id = delivery.packet.id;
                        if let Err(e) = core.on_mesh_delivery(delivery).await {
                            warn!(packet_id = %packet_id, error = %e, "Mesh delivery not handled");
                        }
                    }
                }
            }
            debug!("Delivery task shutting down");
        }
        .instrument(info_span!("delivery")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::topic::{ForwardingRule, TopicFilter};
    use gridmesh_core::{Destination, MockMesh, NodeId, Packet};
    use gridmesh_node::NodeConfig;

    fn make_id(s: &str) -> NodeId {
        NodeId::parse(s).unwrap()
    }

    fn make_relay(config: BridgeConfig) -> (BridgeRelay, Arc<MeshNode>, Arc<MemoryBus>) {
        let mesh = MockMesh::new();
        let node = Arc::new(MeshNode::new(NodeConfig::default(), mesh.transport(make_id("n1"))).unwrap());
        let bus = Arc::new(MemoryBus::new());
        let relay = BridgeRelay::new(config, node.clone(), bus.clone(), None).unwrap();
        (relay, node, bus)
    }

    #[test]
    fn test_device_message_becomes_one_backend_packet() {
        let (relay, node, _bus) = make_relay(BridgeConfig::default());

        let id = relay
            .on_local_message("energy/device/7", b"{\"w\":42}")
            .unwrap();
        assert!(id.is_some());
        assert_eq!(node.queue_len(), 1);
        assert_eq!(relay.stats().forwarded, 1);
    }

    #[test]
    fn test_unmatched_and_looped_messages_ignored() {
        let config = BridgeConfig::empty().with_rule(ForwardingRule::new(
            TopicFilter::parse("#").unwrap(),
            Destination::Backend,
        ));
        let (relay, node, _bus) = make_relay(config);

        assert_eq!(relay.on_local_message("mesh/n2/energy/device/7", b"{}").unwrap(), None);
        assert_eq!(node.queue_len(), 0);

        let (relay, node, _bus) = make_relay(BridgeConfig::default());
        assert_eq!(relay.on_local_message("energy/donor/3/status", b"{}").unwrap(), None);
        assert_eq!(node.queue_len(), 0);

        let stats = relay.stats();
        assert_eq!(stats.unmatched, 1);
        assert_eq!(stats.forwarded, 0);
    }

    #[test]
    fn test_require_json_rejects_text() {
        let config = BridgeConfig::empty().with_rule(
            ForwardingRule::device_to_backend().with_require_json(true),
        );
        let (relay, node, _bus) = make_relay(config);

        assert!(matches!(
            relay.on_local_message("energy/device/7", b"42 watts"),
            Err(BridgeError::Translation(_))
        ));
        assert_eq!(node.queue_len(), 0);
        assert_eq!(relay.stats().rejected, 1);
    }

    #[tokio::test]
    async fn test_node_delivery_is_republished() {
        let (relay, _node, bus) = make_relay(BridgeConfig::default());
        let envelope = BridgeEnvelope::from_bus("energy/recipient/4/status", b"ok").unwrap();
        let packet = Packet::new(
            PacketId::for_source(&make_id("n2"), 0),
            make_id("n2"),
            Destination::Node(make_id("n1")),
            envelope.encode().unwrap(),
        );

        relay.on_mesh_delivery(Delivery { packet }).await.unwrap();

        let published = bus.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "mesh/n2/energy/recipient/4/status");
        assert_eq!(&published[0].payload[..], b"ok");
    }

    #[tokio::test]
    async fn test_backend_delivery_without_sink_fails() {
        let (relay, _node, _bus) = make_relay(BridgeConfig::default());
        let envelope = BridgeEnvelope::from_bus("energy/device/7", b"{}").unwrap();
        let packet = Packet::new(
            PacketId::for_source(&make_id("n2"), 0),
            make_id("n2"),
            Destination::Backend,
            envelope.encode().unwrap(),
        );

        assert!(matches!(
            relay.on_mesh_delivery(Delivery { packet }).await,
            Err(BridgeError::Backend(_))
        ));
        assert_eq!(relay.stats().delivery_errors, 1);
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let (relay, _node, bus) = make_relay(BridgeConfig::default());

        assert!(matches!(relay.stop().await, Err(BridgeError::NotStarted)));
        relay.start().await.unwrap();
        assert!(matches!(relay.start().await, Err(BridgeError::AlreadyStarted)));
        assert_eq!(bus.subscriptions(), vec![TopicFilter::parse("energy/#").unwrap()]);

        relay.stop().await.unwrap();
        assert!(!relay.is_started());
    }
}
