//! Node identity and packet destinations
//!
//! A [`NodeId`] is an opaque string assigned once at startup and never
//! changed for the lifetime of the process. Identities are totally ordered
//! so that routing can break ties deterministically.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::IdentityError;

/// Maximum length of a node identity in bytes
pub const MAX_NODE_ID_LEN: usize = 64;

/// Text form of [`Destination::Backend`]
pub const BACKEND: &str = "backend";

/// Opaque, ordered identity of a mesh node
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, derive_more::Display,
)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Parse and validate an identity
    pub fn parse(s: impl Into<String>) -> Result<Self, IdentityError> {
        let s = s.into();
        validate(&s)?;
        Ok(Self(s))
    }

    /// Generate an identity from boot time
    ///
    /// Produces `{prefix}_{unix_secs}_{rand16:04x}`. The random suffix keeps
    /// two nodes powered on in the same second apart.
    pub fn generate(prefix: &str) -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let suffix: u16 = rand::random();
        Self(format!("{}_{}_{:04x}", prefix, secs, suffix))
    }

    /// Get the identity as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this identity is structurally valid
    ///
    /// Identities built through [`NodeId::parse`] always are; identities
    /// decoded from the wire may not be.
    pub fn is_valid(&self) -> bool {
        validate(&self.0).is_ok()
    }

    /// Short display form (for logging)
    pub fn short_id(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(16)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

fn validate(s: &str) -> Result<(), IdentityError> {
    if s.is_empty() {
        return Err(IdentityError::Empty);
    }
    if s.len() > MAX_NODE_ID_LEN {
        return Err(IdentityError::TooLong {
            len: s.len(),
            max: MAX_NODE_ID_LEN,
        });
    }
    if s.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(IdentityError::InvalidFormat(s.to_string()));
    }
    if s == BACKEND {
        return Err(IdentityError::InvalidFormat(format!(
            "'{}' is reserved for the backend destination",
            BACKEND
        )));
    }
    Ok(())
}

impl FromStr for NodeId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Where a packet is headed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Destination {
    /// A specific mesh node
    Node(NodeId),
    /// The remote backend, reached through a gateway node
    Backend,
}

impl Destination {
    /// Parse a destination; the literal `backend` maps to [`Destination::Backend`]
    pub fn parse(s: &str) -> Result<Self, IdentityError> {
        if s == BACKEND {
            Ok(Self::Backend)
        } else {
            NodeId::parse(s).map(Self::Node)
        }
    }

    /// The node this destination names, if any
    pub fn node(&self) -> Option<&NodeId> {
        match self {
            Self::Node(id) => Some(id),
            Self::Backend => None,
        }
    }

    /// Check if this destination is the backend
    pub fn is_backend(&self) -> bool {
        matches!(self, Self::Backend)
    }

    /// Check if this destination is the given node
    pub fn is_node(&self, id: &NodeId) -> bool {
        matches!(self, Self::Node(n) if n == id)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node(id) => write!(f, "{}", id),
            Self::Backend => f.write_str(BACKEND),
        }
    }
}

impl FromStr for Destination {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<NodeId> for Destination {
    fn from(id: NodeId) -> Self {
        Self::Node(id)
    }
}
