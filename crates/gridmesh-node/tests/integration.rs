//! Integration tests for MeshNode over the in-memory mesh
//!
//! Every test runs with paused time, so beacon intervals and expiry windows
//! elapse instantly and deterministically.

use std::sync::Arc;
use std::time::Duration;

use gridmesh_core::{Frame, MeshTransport, MockMesh, NodeId, decode_frame, encode_frame};
use gridmesh_node::{
    Delivery, Destination, Disposition, DropReason, MeshNode, NodeConfig, NodeError, Packet, PacketId,
};
use parking_lot::Mutex;

fn make_id(s: &str) -> NodeId {
    NodeId::parse(s).unwrap()
}

fn make_node(mesh: &MockMesh, id: &str) -> Arc<MeshNode> {
    let config = NodeConfig::default().with_identity(id);
    Arc::new(MeshNode::new(config, mesh.transport(make_id(id))).unwrap())
}

/// Let spawned tasks run without moving past the next beacon
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

fn collect_deliveries(node: &MeshNode) -> Arc<Mutex<Vec<Delivery>>> {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    node.on_receive(move |delivery| sink.lock().push(delivery));
    received
}

#[tokio::test(start_paused = true)]
async fn test_lifecycle() {
    let mesh = MockMesh::new();
    let node = make_node(&mesh, "n1");

    assert!(matches!(node.stop().await, Err(NodeError::NotStarted)));

    node.start().await.unwrap();
    assert!(node.is_started());
    assert!(matches!(node.start().await, Err(NodeError::AlreadyStarted)));

    node.stop().await.unwrap();
    assert!(!node.is_started());
    assert!(matches!(node.stop().await, Err(NodeError::NotStarted)));

    // Stateless across restarts
    node.start().await.unwrap();
    node.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stop_drops_queued_packets() {
    let mesh = MockMesh::new();
    let node = make_node(&mesh, "n1");

    node.start().await.unwrap();
    node.send(make_id("n2"), &b"x"[..]).unwrap();
    node.send(make_id("n2"), &b"y"[..]).unwrap();
    assert_eq!(node.queue_len(), 2);

    node.stop().await.unwrap();
    assert_eq!(node.queue_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_beacons_discover_neighbors() {
    let mesh = MockMesh::new();
    let n1 = make_node(&mesh, "n1");
    let n2 = make_node(&mesh, "n2");

    n1.start().await.unwrap();
    n2.start().await.unwrap();
    settle().await;

    let n1_peers: Vec<NodeId> = n1.peers().into_iter().map(|p| p.id).collect();
    let n2_peers: Vec<NodeId> = n2.peers().into_iter().map(|p| p.id).collect();
    assert_eq!(n1_peers, vec![make_id("n2")]);
    assert_eq!(n2_peers, vec![make_id("n1")]);

    // Refreshed, not duplicated, by later beacons
    tokio::time::sleep(Duration::from_secs(65)).await;
    assert_eq!(n1.peer_table().size(), 1);
    assert!(n1.peer_table().get(&make_id("n2")).unwrap().beacons >= 3);

    n1.stop().await.unwrap();
    n2.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_silent_peer_expires() {
    let mesh = MockMesh::new();
    let n1 = make_node(&mesh, "n1");
    let n2 = make_node(&mesh, "n2");

    n1.start().await.unwrap();
    n2.start().await.unwrap();
    settle().await;
    assert_eq!(n1.peer_table().size(), 1);

    mesh.cut(&make_id("n1"), &make_id("n2"));

    // Expiry window is 90s and the sweep runs every 45s
    tokio::time::sleep(Duration::from_secs(140)).await;
    assert_eq!(n1.peer_table().size(), 0);
    assert_eq!(n2.peer_table().size(), 0);

    mesh.heal(&make_id("n1"), &make_id("n2"));
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(n1.peer_table().size(), 1);

    n1.stop().await.unwrap();
    n2.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_two_hop_delivery_along_a_line() {
    // n1 <-> n2 <-> n3, with no direct link between n1 and n3
    let mesh = MockMesh::new();
    let n1 = make_node(&mesh, "n1");
    let n2 = make_node(&mesh, "n2");
    let n3 = make_node(&mesh, "n3");
    mesh.cut(&make_id("n1"), &make_id("n3"));
    let received = collect_deliveries(&n3);

    for node in [&n1, &n2, &n3] {
        node.start().await.unwrap();
    }
    settle().await;
    assert_eq!(n1.peer_table().live_ids(), vec![make_id("n2")]);

    n1.send(make_id("n3"), &b"hello"[..]).unwrap();

    let first = n1.process_packets().unwrap();
    assert!(matches!(
        first,
        Disposition::Forwarded { ref next_hop, ttl: 63, .. } if *next_hop == make_id("n2")
    ));
    settle().await;

    // n2 knows n3 directly, so it goes straight there
    let second = n2.process_packets().unwrap();
    assert!(matches!(
        second,
        Disposition::Forwarded { ref next_hop, ttl: 62, .. } if *next_hop == make_id("n3")
    ));
    settle().await;

    let third = n3.process_packets().unwrap();
    assert!(matches!(third, Disposition::Delivered { .. }));

    let deliveries = received.lock();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].packet.source, make_id("n1"));
    assert_eq!(&deliveries[0].packet.payload[..], b"hello");
    assert_eq!(deliveries[0].packet.ttl, 62);
    drop(deliveries);

    for node in [&n1, &n2, &n3] {
        node.stop().await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_forward_through_only_live_peer() {
    let mesh = MockMesh::new();
    let n1 = make_node(&mesh, "n1");
    let n2_transport = mesh.transport(make_id("n2"));

    n1.start().await.unwrap();
    n1.beacon()
        .on_beacon_received(make_id("n2"), tokio::time::Instant::now());

    n1.send(make_id("n3"), &b"hello"[..]).unwrap();
    let disposition = n1.process_packets().unwrap();
    assert_eq!(disposition.next_hop(), Some(&make_id("n2")));
    settle().await;

    // Exactly one data frame went out, to n2, with one hop spent
    let sent = mesh_data_frames(&n2_transport).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].ttl, 63);
    assert_eq!(sent[0].dest, Destination::Node(make_id("n3")));
    assert_eq!(n1.stats().transmitted, 1);

    n1.stop().await.unwrap();
}

async fn mesh_data_frames(transport: &gridmesh_core::MockTransport) -> Vec<gridmesh_node::Packet> {
    let mut packets = Vec::new();
    while let Ok(Ok(bytes)) =
        tokio::time::timeout(Duration::from_millis(1), transport.recv()).await
    {
        if let Ok(Frame::Data { packet, .. }) = decode_frame(&bytes) {
            packets.push(packet);
        }
    }
    packets
}

#[tokio::test(start_paused = true)]
async fn test_isolated_node_drops_with_no_route() {
    let mesh = MockMesh::new();
    let n1 = make_node(&mesh, "n1");
    n1.start().await.unwrap();
    settle().await;
    assert_eq!(n1.peer_table().size(), 0);

    n1.send(make_id("n7"), &b"hello"[..]).unwrap();
    let disposition = n1.process_packets().unwrap();
    assert_eq!(disposition.drop_reason(), Some(DropReason::NoRoute));
    assert!(n1.process_packets().is_none());

    n1.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_gateway_delivers_backend_packets() {
    let mesh = MockMesh::new();
    let sensor = make_node(&mesh, "sensor");
    let gateway = Arc::new(
        MeshNode::new(
            NodeConfig::default().with_identity("gw").with_gateway(true),
            mesh.transport(make_id("gw")),
        )
        .unwrap(),
    );
    let received = collect_deliveries(&gateway);

    sensor.start().await.unwrap();
    gateway.start().await.unwrap();
    settle().await;

    sensor.send(Destination::Backend, &b"{\"w\":42}"[..]).unwrap();
    assert_eq!(sensor.drain(10), 1);
    settle().await;
    assert_eq!(gateway.drain(10), 1);

    let deliveries = received.lock();
    assert_eq!(deliveries.len(), 1);
    assert!(deliveries[0].packet.dest.is_backend());
    drop(deliveries);

    sensor.stop().await.unwrap();
    gateway.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_transport_is_not_fatal() {
    let mesh = MockMesh::new();
    let transport = mesh.transport(make_id("n1"));
    let n1 = Arc::new(
        MeshNode::new(NodeConfig::default().with_identity("n1"), transport.clone()).unwrap(),
    );
    let watcher = mesh.transport(make_id("watcher"));

    transport.set_available(false);
    n1.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(n1.stats().beacons.failed, 3);
    assert!(n1.is_started());

    transport.set_available(true);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(n1.stats().beacons.sent, 1);

    // Only the beacon sent after recovery reached the neighbor
    let bytes = watcher.recv().await.unwrap();
    assert_eq!(decode_frame(&bytes).unwrap(), Frame::beacon(make_id("n1")));
    assert!(
        tokio::time::timeout(Duration::from_millis(1), watcher.recv())
            .await
            .is_err()
    );

    n1.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_transmit_failure_is_counted() {
    let mesh = MockMesh::new();
    let n1 = make_node(&mesh, "n1");
    n1.start().await.unwrap();

    // A peer the beacon table knows but the mesh cannot reach
    n1.beacon()
        .on_beacon_received(make_id("ghost"), tokio::time::Instant::now());
    n1.send(make_id("n9"), &b"x"[..]).unwrap();
    assert!(n1.process_packets().unwrap().next_hop().is_some());
    settle().await;

    let stats = n1.stats();
    assert_eq!(stats.transmit_failed, 1);
    assert_eq!(stats.transmitted, 0);

    n1.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_blank_beacon_cannot_capture_routes() {
    let mesh = MockMesh::new();
    let n1 = make_node(&mesh, "n1");
    let n2 = make_node(&mesh, "n2");
    let rogue = mesh.transport(make_id("rogue"));

    n1.start().await.unwrap();
    n2.start().await.unwrap();
    settle().await;

    // The empty string sorts lowest and would win every tie
    let blank: NodeId = serde_json::from_str("\"\"").unwrap();
    rogue
        .broadcast(encode_frame(&Frame::beacon(blank)).unwrap())
        .await
        .unwrap();
    settle().await;

    assert_eq!(n1.peer_table().live_ids(), vec![make_id("n2")]);
    assert_eq!(n1.stats().undecodable, 1);

    n1.send(make_id("n9"), &b"x"[..]).unwrap();
    let disposition = n1.process_packets().unwrap();
    assert!(matches!(
        disposition,
        Disposition::Forwarded { ref next_hop, ttl: 63, .. } if *next_hop == make_id("n2")
    ));

    n1.stop().await.unwrap();
    n2.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_inbound_overflow_is_counted_and_survived() {
    let mesh = MockMesh::new();
    let n1 = Arc::new(
        MeshNode::new(
            NodeConfig::default().with_identity("n1").with_queue_capacity(1),
            mesh.transport(make_id("n1")),
        )
        .unwrap(),
    );
    let n2 = mesh.transport(make_id("n2"));
    n1.start().await.unwrap();

    let data_frame = |sequence: u64| {
        let packet = Packet::new(
            PacketId::for_source(&make_id("n2"), sequence),
            make_id("n2"),
            Destination::Backend,
            &b"{}"[..],
        );
        encode_frame(&Frame::data(make_id("n2"), packet)).unwrap()
    };

    for sequence in 0..3 {
        n2.send_to(&make_id("n1"), data_frame(sequence)).await.unwrap();
    }
    settle().await;

    let stats = n1.stats();
    assert_eq!(stats.queued, 1);
    assert_eq!(stats.router.rejected, 2);
    assert!(n1.is_started());

    // The inbound task keeps accepting frames once there is room
    assert_eq!(n1.drain(10), 1);
    n2.send_to(&make_id("n1"), data_frame(3)).await.unwrap();
    settle().await;
    assert_eq!(n1.queue_len(), 1);
    assert_eq!(n1.stats().router.rejected, 2);

    n1.stop().await.unwrap();
}
