//! End-to-end bridge tests: bus -> mesh -> bus/backend over the in-memory mesh

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use gridmesh_bridge::{
    BackendSink, BridgeConfig, BridgeEnvelope, BridgeRelay, ForwardingRule, LocalBus, MemoryBackend, MemoryBus,
    TopicFilter,
};
use gridmesh_core::{Destination, Frame, MeshTransport, MockMesh, NodeId, decode_frame};
use gridmesh_node::{MeshNode, NodeConfig};

fn make_id(s: &str) -> NodeId {
    NodeId::parse(s).unwrap()
}

fn make_node(mesh: &MockMesh, id: &str, gateway: bool) -> Arc<MeshNode> {
    let config = NodeConfig::default().with_identity(id).with_gateway(gateway);
    Arc::new(MeshNode::new(config, mesh.transport(make_id(id))).unwrap())
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn test_device_reading_leaves_as_one_backend_packet() {
    let mesh = MockMesh::new();
    let n1 = make_node(&mesh, "n1", false);
    let gw = mesh.transport(make_id("gw"));
    let bus = Arc::new(MemoryBus::new());
    let relay = BridgeRelay::new(BridgeConfig::default(), n1.clone(), bus.clone(), None).unwrap();

    n1.start().await.unwrap();
    relay.start().await.unwrap();
    n1.beacon()
        .on_beacon_received(make_id("gw"), tokio::time::Instant::now());

    bus.publish("energy/device/7", Bytes::from_static(b"{\"w\":42}"))
        .await
        .unwrap();
    bus.publish("energy/donor/3/status", Bytes::from_static(b"{}"))
        .await
        .unwrap();
    settle().await;

    assert_eq!(n1.queue_len(), 1);
    assert_eq!(relay.stats().forwarded, 1);
    assert_eq!(relay.stats().unmatched, 1);

    assert_eq!(n1.drain(10), 1);
    settle().await;

    let mut packets = Vec::new();
    while let Ok(Ok(bytes)) = tokio::time::timeout(Duration::from_millis(1), gw.recv()).await {
        if let Ok(Frame::Data { packet, .. }) = decode_frame(&bytes) {
            packets.push(packet);
        }
    }
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].dest, Destination::Backend);
    assert_eq!(packets[0].source, make_id("n1"));

    let envelope = BridgeEnvelope::decode(&packets[0].payload).unwrap();
    assert_eq!(envelope.topic, "energy/device/7");
    assert_eq!(envelope.payload, "{\"w\":42}");

    relay.stop().await.unwrap();
    n1.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_gateway_posts_to_backend() {
    let mesh = MockMesh::new();
    let sensor = make_node(&mesh, "sensor", false);
    let gateway = make_node(&mesh, "gw", true);
    let sensor_bus = Arc::new(MemoryBus::new());
    let gateway_bus = Arc::new(MemoryBus::new());
    let backend = Arc::new(MemoryBackend::new());
    let sink: Arc<dyn BackendSink> = backend.clone();

    let sensor_relay =
        BridgeRelay::new(BridgeConfig::default(), sensor.clone(), sensor_bus.clone(), None).unwrap();
    let gateway_relay = BridgeRelay::new(
        BridgeConfig::default(),
        gateway.clone(),
        gateway_bus.clone(),
        Some(sink),
    )
    .unwrap();

    for node in [&sensor, &gateway] {
        node.start().await.unwrap();
    }
    sensor_relay.start().await.unwrap();
    gateway_relay.start().await.unwrap();
    settle().await;

    sensor_bus
        .publish("energy/device/7", Bytes::from_static(b"{\"w\":42}"))
        .await
        .unwrap();
    settle().await;
    assert_eq!(sensor.drain(10), 1);
    settle().await;
    assert_eq!(gateway.drain(10), 1);
    settle().await;

    let records = backend.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].node_id, make_id("gw"));
    assert_eq!(records[0].source, make_id("sensor"));
    assert_eq!(records[0].topic, "energy/device/7");
    assert_eq!(records[0].payload_bytes().unwrap(), b"{\"w\":42}");
    assert_eq!(gateway_relay.stats().backend_delivered, 1);

    // Nothing is republished for backend traffic
    assert!(gateway_bus.published().is_empty());

    sensor_relay.stop().await.unwrap();
    gateway_relay.stop().await.unwrap();
    for node in [&sensor, &gateway] {
        node.stop().await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_node_addressed_message_is_republished_remotely() {
    let mesh = MockMesh::new();
    let n1 = make_node(&mesh, "n1", false);
    let n2 = make_node(&mesh, "n2", false);
    let n1_bus = Arc::new(MemoryBus::new());
    let n2_bus = Arc::new(MemoryBus::new());

    let recipient = TopicFilter::parse("energy/recipient/#").unwrap();
    let n1_config = BridgeConfig::empty()
        .with_subscription(recipient.clone())
        .with_rule(ForwardingRule::new(recipient, Destination::Node(make_id("n2"))));
    let n1_relay = BridgeRelay::new(n1_config, n1.clone(), n1_bus.clone(), None).unwrap();
    let n2_relay = BridgeRelay::new(BridgeConfig::default(), n2.clone(), n2_bus.clone(), None).unwrap();

    n1.start().await.unwrap();
    n2.start().await.unwrap();
    n1_relay.start().await.unwrap();
    n2_relay.start().await.unwrap();
    settle().await;

    n1_bus
        .publish("energy/recipient/4/status", Bytes::from_static(b"{\"ok\":true}"))
        .await
        .unwrap();
    settle().await;
    assert_eq!(n1.drain(10), 1);
    settle().await;
    assert_eq!(n2.drain(10), 1);
    settle().await;

    let republished =
        n2_bus.published_matching(&TopicFilter::parse("mesh/#").unwrap());
    assert_eq!(republished.len(), 1);
    assert_eq!(republished[0].topic, "mesh/n1/energy/recipient/4/status");
    assert_eq!(&republished[0].payload[..], b"{\"ok\":true}");

    // The republish is not picked up again by n2's own rules
    assert_eq!(n2.queue_len(), 0);
    assert_eq!(n2_relay.stats().forwarded, 0);

    n1_relay.stop().await.unwrap();
    n2_relay.stop().await.unwrap();
    n1.stop().await.unwrap();
    n2.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stopped_relay_ignores_bus() {
    let mesh = MockMesh::new();
    let n1 = make_node(&mesh, "n1", false);
    let bus = Arc::new(MemoryBus::new());
    let relay = BridgeRelay::new(BridgeConfig::default(), n1.clone(), bus.clone(), None).unwrap();

    relay.start().await.unwrap();
    relay.stop().await.unwrap();

    bus.publish("energy/device/7", Bytes::from_static(b"{}"))
        .await
        .unwrap();
    settle().await;
    assert_eq!(n1.queue_len(), 0);

    // Restartable
    relay.start().await.unwrap();
    bus.publish("energy/device/7", Bytes::from_static(b"{}"))
        .await
        .unwrap();
    settle().await;
    assert_eq!(n1.queue_len(), 1);
    relay.stop().await.unwrap();
}
