//! Mesh transport abstraction
//!
//! The [`MeshTransport`] trait is the only thing the node core knows about
//! the link layer. The kernel mesh interface underneath (batman-adv, or an
//! in-memory hub in tests) is opaque; the core needs just three operations.
//!
//! ## Implementations
//!
//! - [`MockTransport`](crate::MockTransport): In-memory transport for testing
//! - `UdpMeshTransport`: UDP broadcast over the mesh interface (in gridmesh-transport)

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TransportError;
use crate::identity::NodeId;

/// Link-layer operations the mesh core depends on
///
/// Frames are opaque bytes at this level; encoding and decoding of
/// [`Frame`](crate::Frame) happens in the node.
#[async_trait]
pub trait MeshTransport: Send + Sync + 'static {
    /// Our identity on the mesh
    fn local_id(&self) -> &NodeId;

    /// Send a frame to every node in radio range
    async fn broadcast(&self, frame: Bytes) -> Result<(), TransportError>;

    /// Send a frame to one neighbor
    ///
    /// # Errors
    ///
    /// Returns an error if the neighbor is unknown to the link or the send fails.
    async fn send_to(&self, peer: &NodeId, frame: Bytes) -> Result<(), TransportError>;

    /// Wait for the next inbound frame
    ///
    /// Returns [`TransportError::ReceiveFailed`] once the link is closed for good.
    async fn recv(&self) -> Result<Bytes, TransportError>;
}
