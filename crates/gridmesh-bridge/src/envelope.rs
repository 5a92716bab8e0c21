//! The JSON envelope that carries a bus message across the mesh

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// A local bus message in transit
///
/// Bus payloads are text (typically JSON); anything that is not valid UTF-8
/// is refused at the edge of the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeEnvelope {
    /// Topic the message was published on
    pub topic: String,
    /// Message body
    pub payload: String,
}

impl BridgeEnvelope {
    /// Wrap a bus message
    pub fn from_bus(topic: &str, payload: &[u8]) -> Result<Self, BridgeError> {
        let payload = std::str::from_utf8(payload).map_err(|e| {
            BridgeError::Translation(format!("payload on '{}' is not UTF-8: {}", topic, e))
        })?;
        Ok(Self {
            topic: topic.to_string(),
            payload: payload.to_string(),
        })
    }

    /// Check that the payload parses as JSON
    pub fn ensure_json(&self) -> Result<(), BridgeError> {
        serde_json::from_str::<serde_json::Value>(&self.payload)
            .map(|_| ())
            .map_err(|e| {
                BridgeError::Translation(format!("payload on '{}' is not JSON: {}", self.topic, e))
            })
    }

    /// Serialize for a mesh packet
    pub fn encode(&self) -> Result<Vec<u8>, BridgeError> {
        serde_json::to_vec(self).map_err(|e| BridgeError::Translation(e.to_string()))
    }

    /// Parse a mesh packet payload
    pub fn decode(bytes: &[u8]) -> Result<Self, BridgeError> {
        serde_json::from_slice(bytes)
            .map_err(|e| BridgeError::Translation(format!("bad envelope: {}", e)))
    }
}
