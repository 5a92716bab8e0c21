//! # GridMesh Transport
//!
//! The production [`MeshTransport`](gridmesh_core::MeshTransport): UDP
//! datagrams over the kernel mesh interface.
//!
//! batman-adv does the multi-hop work at layer 2, so every node in the mesh
//! looks like it sits on one broadcast domain. Beacons go to the broadcast
//! address; data frames go to the unicast address learned from the last
//! frame a neighbor sent us.
//!
//! ## Example
//!
//! ```rust,ignore
//! use gridmesh_transport::{TransportConfig, UdpMeshTransport};
//!
//! let config = TransportConfig::default();
//! if config.interface.configure {
//!     config.interface.batman().attach().await?;
//! }
//! let transport = UdpMeshTransport::bind(node_id, &config).await?;
//! ```

pub mod batman;
pub mod config;
pub mod udp;

// Re-export main types
pub use batman::BatmanInterface;
pub use config::{DEFAULT_PORT, InterfaceConfig, TransportConfig};
pub use udp::UdpMeshTransport;
