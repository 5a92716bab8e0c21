//! In-memory mesh for testing
//!
//! [`MockMesh`] is a hub that every [`MockTransport`] registers with.
//! Broadcasts reach every other registered transport whose link is not cut;
//! unicast reaches only the addressed one. Transports can be switched
//! unavailable to exercise the node's retry-on-next-tick behavior.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use gridmesh_core::{MockMesh, MeshTransport, NodeId};
//!
//! let mesh = MockMesh::new();
//! let n1 = mesh.transport(NodeId::parse("n1")?);
//! let n2 = mesh.transport(NodeId::parse("n2")?);
//!
//! n1.send_to(n2.local_id(), frame).await?;
//! let bytes = n2.recv().await?;
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{Mutex as AsyncMutex, mpsc};

use crate::error::TransportError;
use crate::identity::NodeId;
use crate::transport::MeshTransport;

/// Inbox capacity per mock transport
const MOCK_INBOX_CAPACITY: usize = 1024;

/// A frame recorded by a [`MockTransport`] on its way out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentFrame {
    /// Sent with `broadcast`
    Broadcast(Bytes),
    /// Sent with `send_to`
    Unicast { to: NodeId, frame: Bytes },
}

#[derive(Default)]
struct MeshHub {
    /// Registered inboxes (node -> sender channel)
    inboxes: DashMap<NodeId, mpsc::Sender<Bytes>>,
    /// Cut links, stored with the lower id first
    cut_links: RwLock<HashSet<(NodeId, NodeId)>>,
}

impl MeshHub {
    fn link_key(a: &NodeId, b: &NodeId) -> (NodeId, NodeId) {
        if a <= b {
            (a.clone(), b.clone())
        } else {
            (b.clone(), a.clone())
        }
    }

    fn linked(&self, a: &NodeId, b: &NodeId) -> bool {
        !self.cut_links.read().contains(&Self::link_key(a, b))
    }
}

/// In-memory mesh connecting any number of [`MockTransport`]s
#[derive(Clone, Default)]
pub struct MockMesh {
    hub: Arc<MeshHub>,
}

impl MockMesh {
    /// Create an empty mesh
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node and return its transport
    pub fn transport(&self, local_id: NodeId) -> Arc<MockTransport> {
        let (inbox_tx, inbox_rx) = mpsc::channel(MOCK_INBOX_CAPACITY);
        self.hub.inboxes.insert(local_id.clone(), inbox_tx);
        Arc::new(MockTransport {
            local_id,
            hub: self.hub.clone(),
            inbox: AsyncMutex::new(inbox_rx),
            available: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
        })
    }

    /// Cut the radio link between two nodes
    pub fn cut(&self, a: &NodeId, b: &NodeId) {
        self.hub.cut_links.write().insert(MeshHub::link_key(a, b));
    }

    /// Restore the radio link between two nodes
    pub fn heal(&self, a: &NodeId, b: &NodeId) {
        self.hub.cut_links.write().remove(&MeshHub::link_key(a, b));
    }

    /// Remove a node from the mesh; its inbox closes
    pub fn remove(&self, id: &NodeId) {
        self.hub.inboxes.remove(id);
    }

    /// Number of registered nodes
    pub fn len(&self) -> usize {
        self.hub.inboxes.len()
    }

    /// Check if no nodes are registered
    pub fn is_empty(&self) -> bool {
        self.hub.inboxes.is_empty()
    }
}

/// A mock transport attached to a [`MockMesh`]
pub struct MockTransport {
    /// Our identity
    local_id: NodeId,
    /// The shared hub
    hub: Arc<MeshHub>,
    /// Incoming frames
    inbox: AsyncMutex<mpsc::Receiver<Bytes>>,
    /// When false, every send fails with `Unavailable`
    available: AtomicBool,
    /// Outbound frames, in send order
    sent: Mutex<Vec<SentFrame>>,
}

impl MockTransport {
    /// Simulate the mesh interface going down or coming back
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Check if the transport currently accepts sends
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Every frame sent so far
    pub fn sent_frames(&self) -> Vec<SentFrame> {
        self.sent.lock().clone()
    }

    /// Forget recorded outbound frames
    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }

    fn ensure_available(&self) -> Result<(), TransportError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(TransportError::Unavailable(format!(
                "mock link for {} is down",
                self.local_id
            )))
        }
    }
}

#[async_trait]
impl MeshTransport for MockTransport {
    fn local_id(&self) -> &NodeId {
        &self.local_id
    }

    async fn broadcast(&self, frame: Bytes) -> Result<(), TransportError> {
        self.ensure_available()?;
        self.sent.lock().push(SentFrame::Broadcast(frame.clone()));

        let targets: Vec<mpsc::Sender<Bytes>> = self
            .hub
            .inboxes
            .iter()
            .filter(|entry| {
                entry.key() != &self.local_id && self.hub.linked(&self.local_id, entry.key())
            })
            .map(|entry| entry.value().clone())
            .collect();

        // Broadcast is best effort: a full inbox just misses the frame
        for target in targets {
            let _ = target.try_send(frame.clone());
        }
        Ok(())
    }

    async fn send_to(&self, peer: &NodeId, frame: Bytes) -> Result<(), TransportError> {
        self.ensure_available()?;

        if !self.hub.linked(&self.local_id, peer) {
            return Err(TransportError::PeerNotConnected(peer.to_string()));
        }

        let target = self
            .hub
            .inboxes
            .get(peer)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransportError::PeerNotConnected(peer.to_string()))?;

        self.sent.lock().push(SentFrame::Unicast {
            to: peer.clone(),
            frame: frame.clone(),
        });

        target
            .send(frame)
            .await
            .map_err(|_| TransportError::SendFailed("channel closed".into()))
    }

    async fn recv(&self) -> Result<Bytes, TransportError> {
        let mut inbox = self.inbox.lock().await;
        inbox
            .recv()
            .await
            .ok_or_else(|| TransportError::ReceiveFailed("channel closed".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_id(s: &str) -> NodeId {
        NodeId::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_unicast_between_two_nodes() {
        let mesh = MockMesh::new();
        let a = mesh.transport(make_id("a"));
        let b = mesh.transport(make_id("b"));

        tokio_test::assert_ok!(a.send_to(b.local_id(), Bytes::from_static(b"hi")).await);
        let received = b.recv().await.unwrap();
        assert_eq!(&received[..], b"hi");

        assert_eq!(
            a.sent_frames(),
            vec![SentFrame::Unicast {
                to: make_id("b"),
                frame: Bytes::from_static(b"hi"),
            }]
        );
    }

    #[tokio::test]
    async fn test_broadcast_skips_self_and_cut_links() {
        let mesh = MockMesh::new();
        let a = mesh.transport(make_id("a"));
        let b = mesh.transport(make_id("b"));
        let c = mesh.transport(make_id("c"));

        mesh.cut(&make_id("c"), &make_id("a"));
        a.broadcast(Bytes::from_static(b"beacon")).await.unwrap();

        assert_eq!(&b.recv().await.unwrap()[..], b"beacon");
        assert!(c.inbox.lock().await.try_recv().is_err());
        assert!(a.inbox.lock().await.try_recv().is_err());

        mesh.heal(&make_id("a"), &make_id("c"));
        a.broadcast(Bytes::from_static(b"again")).await.unwrap();
        assert_eq!(&c.recv().await.unwrap()[..], b"again");
    }

    #[tokio::test]
    async fn test_unavailable_transport_fails_sends() {
        let mesh = MockMesh::new();
        let a = mesh.transport(make_id("a"));
        let _b = mesh.transport(make_id("b"));

        a.set_available(false);
        assert!(matches!(
            a.broadcast(Bytes::new()).await,
            Err(TransportError::Unavailable(_))
        ));
        assert!(matches!(
            a.send_to(&make_id("b"), Bytes::new()).await,
            Err(TransportError::Unavailable(_))
        ));
        assert!(a.sent_frames().is_empty());

        a.set_available(true);
        assert!(a.broadcast(Bytes::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_send_to_unknown_peer() {
        let mesh = MockMesh::new();
        let a = mesh.transport(make_id("a"));

        assert!(matches!(
            a.send_to(&make_id("ghost"), Bytes::new()).await,
            Err(TransportError::PeerNotConnected(_))
        ));
    }

    #[tokio::test]
    async fn test_removed_node_inbox_closes() {
        let mesh = MockMesh::new();
        let a = mesh.transport(make_id("a"));
        assert_eq!(mesh.len(), 1);

        mesh.remove(&make_id("a"));
        assert!(mesh.is_empty());
        assert!(matches!(
            a.recv().await,
            Err(TransportError::ReceiveFailed(_))
        ));
    }
}
