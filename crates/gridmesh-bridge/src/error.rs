//! Error types for the bridge

use gridmesh_node::NodeError;
use thiserror::Error;

/// Errors that can occur in the bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A bus payload or mesh envelope could not be translated
    #[error("Translation error: {0}")]
    Translation(String),

    /// Local bus error
    #[error("Bus error: {0}")]
    Bus(String),

    /// Backend delivery failed
    #[error("Backend error: {0}")]
    Backend(String),

    /// The mesh node refused the packet
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    /// Invalid topic filter
    #[error("Invalid topic filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    /// Invalid bridge configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Bridge already started
    #[error("Bridge already started")]
    AlreadyStarted,

    /// Bridge not started
    #[error("Bridge not started")]
    NotStarted,
}

impl From<rumqttc::ClientError> for BridgeError {
    fn from(e: rumqttc::ClientError) -> Self {
        BridgeError::Bus(e.to_string())
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(e: reqwest::Error) -> Self {
        BridgeError::Backend(e.to_string())
    }
}

/// Result type alias for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;
