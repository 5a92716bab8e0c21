//! Transport configuration

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::batman::BatmanInterface;

/// Default UDP port for mesh frames
pub const DEFAULT_PORT: u16 = 4869;

/// UDP transport settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// UDP port shared by every node on the mesh
    pub port: u16,
    /// Local address to bind
    pub bind_addr: IpAddr,
    /// Where beacons are sent
    pub broadcast_addr: IpAddr,
    /// Mesh interface setup
    pub interface: InterfaceConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            broadcast_addr: IpAddr::V4(Ipv4Addr::BROADCAST),
            interface: InterfaceConfig::default(),
        }
    }
}

impl TransportConfig {
    /// Set the UDP port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the bind address
    pub fn with_bind_addr(mut self, addr: IpAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the broadcast address
    pub fn with_broadcast_addr(mut self, addr: IpAddr) -> Self {
        self.broadcast_addr = addr;
        self
    }

    /// Socket address to bind
    pub fn bind_socket(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    /// Socket address beacons are sent to
    pub fn broadcast_socket(&self) -> SocketAddr {
        SocketAddr::new(self.broadcast_addr, self.port)
    }
}

/// batman-adv interface setup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterfaceConfig {
    /// Attach the wireless interface to the mesh at startup
    pub configure: bool,
    /// Physical wireless interface
    pub phy: String,
    /// batman-adv virtual interface
    pub mesh: String,
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            configure: false,
            phy: "wlan0".into(),
            mesh: "bat0".into(),
        }
    }
}

impl InterfaceConfig {
    /// The interface described by this configuration
    pub fn batman(&self) -> BatmanInterface {
        BatmanInterface::new(&self.phy, &self.mesh)
    }
}
