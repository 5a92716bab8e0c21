//! # GridMesh Core
//!
//! Core types, wire frames, and errors shared by every GridMesh crate.
//!
//! The routing, node, and bridge layers are written against the
//! [`MeshTransport`] trait so that the same logic runs on the real UDP mesh
//! transport and on the in-memory [`MockMesh`] used by tests.
//!
//! ## Key Types
//!
//! - [`NodeId`]: Opaque, ordered node identity
//! - [`Destination`]: A node or the `backend` sink
//! - [`Packet`]: An application packet with a hop budget (`ttl`)
//! - [`Frame`]: What actually travels over the mesh (beacon or data)
//! - [`RoutingDecision`]: Outcome of the forwarding decision
//!
//! ## Key Traits
//!
//! - [`MeshTransport`]: Broadcast, unicast, and receive over the mesh link
//! - [`Clock`]: Time abstraction for testability

pub mod clock;
pub mod error;
pub mod frame;
pub mod identity;
pub mod mock_transport;
pub mod packet;
pub mod routing;
pub mod transport;

// Re-export main types
pub use clock::*;
pub use error::*;
pub use frame::*;
pub use identity::*;
pub use mock_transport::*;
pub use packet::*;
pub use routing::*;
pub use transport::*;
