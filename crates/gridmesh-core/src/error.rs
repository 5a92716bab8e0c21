//! Error types shared across GridMesh crates

use thiserror::Error;

/// Errors related to node identity
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("Node identity must not be empty")]
    Empty,

    #[error("Invalid identity format: {0}")]
    InvalidFormat(String),

    #[error("Identity too long: {len} bytes (max {max})")]
    TooLong { len: usize, max: usize },
}

/// Errors related to the mesh transport
///
/// All of these are transient from the node's point of view: a failed
/// beacon or transmit is logged and retried on the next scheduled tick.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Peer not reachable: {0}")]
    PeerNotConnected(String),

    #[error("Transport I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e.to_string())
    }
}

/// Errors that can occur while framing or parsing wire frames
#[derive(Debug, Clone, Error)]
pub enum FramingError {
    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Deserialization failed: {0}")]
    Deserialization(String),

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Insufficient data: needed {needed} bytes, have {available}")]
    InsufficientData { needed: usize, available: usize },
}
