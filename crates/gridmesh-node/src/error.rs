//! Error types for the mesh node

use gridmesh_core::{IdentityError, TransportError};
use gridmesh_routing::RoutingError;
use thiserror::Error;

/// Errors that can occur in the mesh node
#[derive(Debug, Error)]
pub enum NodeError {
    /// Node already started
    #[error("Node already started")]
    AlreadyStarted,

    /// Node not started
    #[error("Node not started")]
    NotStarted,

    /// The packet queue is full; back off or drop
    #[error("Packet queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// Payload exceeds what a single packet can carry
    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport layer error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Invalid node identity
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),
}

impl From<RoutingError> for NodeError {
    fn from(e: RoutingError) -> Self {
        match e {
            RoutingError::QueueFull { capacity } => NodeError::QueueFull { capacity },
        }
    }
}

/// Result type alias for node operations
pub type NodeResult<T> = Result<T, NodeError>;
