//! Configuration for the mesh node

use std::time::Duration;

use gridmesh_core::{DEFAULT_TTL, NodeId};
use gridmesh_routing::DEFAULT_QUEUE_CAPACITY;
use gridmesh_transport::TransportConfig;
use serde::{Deserialize, Serialize};

use crate::error::{NodeError, NodeResult};

/// Default identity prefix for generated node ids
pub const DEFAULT_IDENTITY_PREFIX: &str = "pi_node";

/// Configuration for a [`MeshNode`](crate::MeshNode)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Fixed identity; generated from `identity_prefix` when absent
    pub identity_seed: Option<String>,
    /// Prefix for generated identities
    pub identity_prefix: String,
    /// Seconds between beacons
    pub beacon_interval_secs: u64,
    /// Seconds of silence after which a peer is dropped
    pub expiry_window_secs: u64,
    /// Hop budget for packets this node originates
    pub default_ttl: u8,
    /// Maximum queued packets
    pub queue_capacity: usize,
    /// Accept `backend`-bound packets locally
    pub gateway: bool,
    /// Mesh transport settings
    pub transport: TransportConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            identity_seed: None,
            identity_prefix: DEFAULT_IDENTITY_PREFIX.into(),
            beacon_interval_secs: 30,
            expiry_window_secs: 90,
            default_ttl: DEFAULT_TTL,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            gateway: false,
            transport: TransportConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Set a fixed identity
    pub fn with_identity(mut self, seed: impl Into<String>) -> Self {
        self.identity_seed = Some(seed.into());
        self
    }

    /// Set the beacon interval
    pub fn with_beacon_interval(mut self, secs: u64) -> Self {
        self.beacon_interval_secs = secs;
        self
    }

    /// Set the peer expiry window
    pub fn with_expiry_window(mut self, secs: u64) -> Self {
        self.expiry_window_secs = secs;
        self
    }

    /// Set the default TTL
    pub fn with_default_ttl(mut self, ttl: u8) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Set the queue capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Make this node a gateway to the backend
    pub fn with_gateway(mut self, gateway: bool) -> Self {
        self.gateway = gateway;
        self
    }

    /// Set the transport configuration
    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Beacon interval as a duration
    pub fn beacon_interval(&self) -> Duration {
        Duration::from_secs(self.beacon_interval_secs)
    }

    /// Expiry window as a duration
    pub fn expiry_window(&self) -> Duration {
        Duration::from_secs(self.expiry_window_secs)
    }

    /// Check the configuration for values the node cannot run with
    pub fn validate(&self) -> NodeResult<()> {
        if self.beacon_interval_secs == 0 {
            return Err(NodeError::Config("beacon_interval must be positive".into()));
        }
        if self.expiry_window_secs <= self.beacon_interval_secs {
            return Err(NodeError::Config(format!(
                "expiry_window ({}s) must exceed beacon_interval ({}s)",
                self.expiry_window_secs, self.beacon_interval_secs
            )));
        }
        if self.queue_capacity == 0 {
            return Err(NodeError::Config("queue_capacity must be positive".into()));
        }
        if self.default_ttl == 0 {
            return Err(NodeError::Config("default_ttl must be positive".into()));
        }
        if let Some(seed) = &self.identity_seed {
            NodeId::parse(seed.as_str())?;
        }
        Ok(())
    }

    /// The identity this configuration names
    ///
    /// Uses `identity_seed` verbatim when set, otherwise generates one.
    pub fn resolve_identity(&self) -> NodeResult<NodeId> {
        match &self.identity_seed {
            Some(seed) => Ok(NodeId::parse(seed.as_str())?),
            None => Ok(NodeId::generate(&self.identity_prefix)),
        }
    }
}
