//! Wire frames exchanged over the mesh transport
//!
//! Every datagram on the mesh carries exactly one [`Frame`], serialized with
//! postcard and prefixed with its length as a 4-byte big-endian integer.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::FramingError;
use crate::identity::NodeId;
use crate::packet::{MAX_PAYLOAD_SIZE, Packet};

/// Largest UDP payload over IPv4
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Length prefix size in bytes
const LEN_PREFIX: usize = 4;

/// Largest serialized frame accepted on the wire
pub const MAX_FRAME_SIZE: usize = MAX_DATAGRAM_SIZE - LEN_PREFIX;

// Header slack for the largest identities plus packet metadata
const _: () = assert!(MAX_PAYLOAD_SIZE + 1024 <= MAX_FRAME_SIZE);

/// A unit of mesh traffic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    /// Periodic liveness announcement
    Beacon {
        /// The announcing node
        sender: NodeId,
    },
    /// An application packet handed to the next hop
    Data {
        /// The node transmitting this hop (not necessarily the packet source)
        sender: NodeId,
        /// The packet itself
        packet: Packet,
    },
}

impl Frame {
    /// Create a beacon frame
    pub fn beacon(sender: NodeId) -> Self {
        Self::Beacon { sender }
    }

    /// Create a data frame
    pub fn data(sender: NodeId, packet: Packet) -> Self {
        Self::Data { sender, packet }
    }

    /// The node that transmitted this frame
    pub fn sender(&self) -> &NodeId {
        match self {
            Self::Beacon { sender } | Self::Data { sender, .. } => sender,
        }
    }

    /// Short name of the frame type (for logging)
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Beacon { .. } => "beacon",
            Self::Data { .. } => "data",
        }
    }
}

/// Serialize and length-prefix a frame
pub fn encode_frame(frame: &Frame) -> Result<Bytes, FramingError> {
    let serialized =
        postcard::to_allocvec(frame).map_err(|e| FramingError::Serialization(e.to_string()))?;

    if serialized.len() > MAX_FRAME_SIZE {
        return Err(FramingError::FrameTooLarge {
            size: serialized.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    let len = serialized.len() as u32;
    let mut framed = Vec::with_capacity(LEN_PREFIX + serialized.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(&serialized);

    Ok(Bytes::from(framed))
}

/// Parse a length-prefixed frame
pub fn decode_frame(data: &[u8]) -> Result<Frame, FramingError> {
    if data.len() < LEN_PREFIX {
        return Err(FramingError::InsufficientData {
            needed: LEN_PREFIX,
            available: data.len(),
        });
    }

    let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;

    if len > MAX_FRAME_SIZE {
        return Err(FramingError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }

    if data.len() < LEN_PREFIX + len {
        return Err(FramingError::InsufficientData {
            needed: LEN_PREFIX + len,
            available: data.len(),
        });
    }

    postcard::from_bytes(&data[LEN_PREFIX..LEN_PREFIX + len])
        .map_err(|e| FramingError::Deserialization(e.to_string()))
}
