//! # GridMesh Bridge
//!
//! Connects a node's local telemetry bus to the mesh.
//!
//! Messages published on the Pi's MQTT broker (smart meters, inverters,
//! battery controllers) are matched against [`ForwardingRule`]s and sent
//! across the mesh wrapped in a [`BridgeEnvelope`]. On the receiving side the
//! envelope is unwrapped again: on a gateway, packets addressed to `backend`
//! are POSTed to the backend; anything else is republished on the local bus
//! under `mesh/<source>/<topic>`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use gridmesh_bridge::{BridgeConfig, BridgeRelay, MqttBus, MqttConfig};
//!
//! let bus = Arc::new(MqttBus::connect(&MqttConfig::default(), node.identity().as_str()));
//! let relay = BridgeRelay::new(BridgeConfig::default(), node.clone(), bus, None)?;
//! relay.start().await?;
//! ```

pub mod backend;
pub mod bus;
mod config;
pub mod envelope;
mod error;
pub mod mqtt;
mod relay;
pub mod topic;

pub use backend::{BackendConfig, BackendRecord, BackendSink, HttpBackend, MemoryBackend};
pub use bus::{BUS_CHANNEL_CAPACITY, BusMessage, LocalBus, MemoryBus};
pub use config::{BridgeConfig, DEFAULT_REPUBLISH_PREFIX};
pub use envelope::BridgeEnvelope;
pub use error::{BridgeError, BridgeResult};
pub use mqtt::{MqttBus, MqttConfig};
pub use relay::{BridgeRelay, BridgeStats};
pub use topic::{ForwardingRule, TopicFilter};
