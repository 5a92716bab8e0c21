//! Topic filters and forwarding rules
//!
//! Filters follow MQTT wildcard rules: `+` matches exactly one level, `#`
//! matches any number of trailing levels (including none) and may only
//! appear last.

use std::fmt;
use std::str::FromStr;

use gridmesh_core::Destination;
use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// A parsed MQTT-style topic filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TopicFilter {
    raw: String,
    levels: Vec<Level>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Level {
    Literal(String),
    Single,
    Multi,
}

impl TopicFilter {
    /// Parse a filter such as `energy/device/+/alert` or `energy/#`
    pub fn parse(filter: &str) -> Result<Self, BridgeError> {
        let invalid = |reason: &str| BridgeError::InvalidFilter {
            filter: filter.to_string(),
            reason: reason.to_string(),
        };

        if filter.is_empty() {
            return Err(invalid("empty filter"));
        }

        let parts: Vec<&str> = filter.split('/').collect();
        let mut levels = Vec::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            let level = match *part {
                "+" => Level::Single,
                "#" if i + 1 == parts.len() => Level::Multi,
                "#" => return Err(invalid("'#' must be the last level")),
                p if p.contains('+') || p.contains('#') => {
                    return Err(invalid("wildcards must occupy a whole level"));
                }
                p => Level::Literal(p.to_string()),
            };
            levels.push(level);
        }

        Ok(Self {
            raw: filter.to_string(),
            levels,
        })
    }

    /// Check if a concrete topic matches this filter
    pub fn matches(&self, topic: &str) -> bool {
        let mut parts = topic.split('/');
        for level in &self.levels {
            match level {
                Level::Multi => return true,
                Level::Single => {
                    if parts.next().is_none() {
                        return false;
                    }
                }
                Level::Literal(expected) => match parts.next() {
                    Some(part) if part == expected => {}
                    _ => return false,
                },
            }
        }
        parts.next().is_none()
    }

    /// The filter as written
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for TopicFilter {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TopicFilter {
    type Error = BridgeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<TopicFilter> for String {
    fn from(filter: TopicFilter) -> Self {
        filter.raw
    }
}

/// Which local bus messages go onto the mesh, and where
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingRule {
    /// Topics this rule considers
    pub pattern: TopicFilter,
    /// Substring the topic must also contain
    #[serde(default)]
    pub marker: Option<String>,
    /// Mesh destination (`backend` or a node id)
    #[serde(with = "destination_text")]
    pub dest: Destination,
    /// Reject payloads that are not JSON
    #[serde(default)]
    pub require_json: bool,
}

impl ForwardingRule {
    /// Create a rule for every topic matching `pattern`
    pub fn new(pattern: TopicFilter, dest: Destination) -> Self {
        Self {
            pattern,
            marker: None,
            dest,
            require_json: false,
        }
    }

    /// Additionally require `marker` somewhere in the topic
    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = Some(marker.into());
        self
    }

    /// Require JSON payloads
    pub fn with_require_json(mut self, require: bool) -> Self {
        self.require_json = require;
        self
    }

    /// The stock rule: device topics under `energy/` go to the backend
    pub fn device_to_backend() -> Self {
        Self {
            pattern: TopicFilter {
                raw: "energy/#".into(),
                levels: vec![Level::Literal("energy".into()), Level::Multi],
            },
            marker: Some("device".into()),
            dest: Destination::Backend,
            require_json: false,
        }
    }

    /// Check if a topic falls under this rule
    pub fn matches(&self, topic: &str) -> bool {
        self.pattern.matches(topic)
            && self
                .marker
                .as_deref()
                .is_none_or(|marker| topic.contains(marker))
    }
}

mod destination_text {
    use gridmesh_core::Destination;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(dest: &Destination, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(dest)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Destination, D::Error> {
        let text = String::deserialize(d)?;
        Destination::parse(&text).map_err(D::Error::custom)
    }
}
