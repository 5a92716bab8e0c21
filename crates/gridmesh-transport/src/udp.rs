//! UDP mesh transport
//!
//! One socket per node, bound with `SO_BROADCAST`. Neighbor addresses are
//! learned from the `sender` field of every frame that decodes; a neighbor
//! we have never heard from cannot be unicast to.

use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use gridmesh_core::{MAX_FRAME_SIZE, MeshTransport, NodeId, TransportError, decode_frame};
use tokio::net::UdpSocket;
use tracing::{debug, info, trace};

/// Receive buffer size: largest frame plus its length prefix
const RECV_BUFFER_SIZE: usize = MAX_FRAME_SIZE + 4;

/// UDP datagram transport over the mesh interface
pub struct UdpMeshTransport {
    /// Our identity
    local_id: NodeId,
    /// The bound socket
    socket: UdpSocket,
    /// Where beacons are sent
    broadcast_target: SocketAddr,
    /// Learned neighbor addresses
    neighbors: DashMap<NodeId, SocketAddr>,
}

impl UdpMeshTransport {
    /// Bind the transport described by `config`
    pub async fn bind(
        local_id: NodeId,
        config: &crate::TransportConfig,
    ) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(config.bind_socket()).await?;
        socket.set_broadcast(true)?;

        info!(
            node = %local_id,
            addr = %socket.local_addr()?,
            broadcast = %config.broadcast_socket(),
            "Mesh transport bound"
        );

        Ok(Self {
            local_id,
            socket,
            broadcast_target: config.broadcast_socket(),
            neighbors: DashMap::new(),
        })
    }

    /// Send beacons somewhere other than the configured broadcast address
    pub fn with_broadcast_target(mut self, target: SocketAddr) -> Self {
        self.broadcast_target = target;
        self
    }

    /// The address the socket is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    /// The learned address of a neighbor
    pub fn neighbor_addr(&self, peer: &NodeId) -> Option<SocketAddr> {
        self.neighbors.get(peer).map(|e| *e.value())
    }

    /// Number of neighbors with a learned address
    pub fn known_neighbors(&self) -> usize {
        self.neighbors.len()
    }

    fn learn(&self, sender: NodeId, addr: SocketAddr) {
        if let Some(previous) = self.neighbors.insert(sender.clone(), addr) {
            if previous != addr {
                debug!(peer = %sender, from = %previous, to = %addr, "Neighbor address changed");
            }
        } else {
            debug!(peer = %sender, addr = %addr, "Neighbor address learned");
        }
    }
}

#[async_trait]
impl MeshTransport for UdpMeshTransport {
    fn local_id(&self) -> &NodeId {
        &self.local_id
    }

    async fn broadcast(&self, frame: Bytes) -> Result<(), TransportError> {
        self.socket
            .send_to(&frame, self.broadcast_target)
            .await
            .map_err(|e| TransportError::SendFailed(format!("broadcast: {}", e)))?;
        Ok(())
    }

    async fn send_to(&self, peer: &NodeId, frame: Bytes) -> Result<(), TransportError> {
        let addr = self
            .neighbor_addr(peer)
            .ok_or_else(|| TransportError::PeerNotConnected(peer.to_string()))?;

        self.socket
            .send_to(&frame, addr)
            .await
            .map_err(|e| TransportError::SendFailed(format!("{} ({}): {}", peer, addr, e)))?;
        Ok(())
    }

    async fn recv(&self) -> Result<Bytes, TransportError> {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        loop {
            let (len, from) = self
                .socket
                .recv_from(&mut buf)
                .await
                .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;
            let datagram = &buf[..len];

            // Undecodable datagrams are still handed up so the node can log them
            match decode_frame(datagram) {
                Ok(frame) if frame.sender() == &self.local_id => {
                    trace!("Ignoring our own broadcast");
                    continue;
                }
                Ok(frame) => self.learn(frame.sender().clone(), from),
                Err(e) => trace!(from = %from, error = %e, "Datagram did not decode"),
            }

            return Ok(Bytes::copy_from_slice(datagram));
        }
    }
}
