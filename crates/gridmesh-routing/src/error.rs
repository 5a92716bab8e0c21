//! Routing error types
//!
//! Drops are not errors: they are [`DropReason`](gridmesh_core::DropReason)
//! dispositions that get logged and counted. The only failure a caller of
//! the routing layer sees is backpressure.

use thiserror::Error;

/// Errors surfaced by the routing layer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// The packet queue is at capacity; the producer must back off or drop
    #[error("Packet queue full (capacity {capacity})")]
    QueueFull { capacity: usize },
}

/// Result type for routing operations
pub type RoutingResult<T> = Result<T, RoutingError>;
