//! Bridge configuration

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};
use crate::topic::{ForwardingRule, TopicFilter};

/// Default prefix for messages republished from the mesh
pub const DEFAULT_REPUBLISH_PREFIX: &str = "mesh";

/// Configuration for a [`BridgeRelay`](crate::BridgeRelay)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Bus topics to subscribe to
    pub subscribe: Vec<TopicFilter>,
    /// Forwarding rules, first match wins
    pub rules: Vec<ForwardingRule>,
    /// Topic prefix for mesh messages put back on the bus
    pub republish_prefix: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        let device = ForwardingRule::device_to_backend();
        Self {
            subscribe: vec![device.pattern.clone()],
            rules: vec![device],
            republish_prefix: DEFAULT_REPUBLISH_PREFIX.into(),
        }
    }
}

impl BridgeConfig {
    /// A config with no subscriptions and no rules
    pub fn empty() -> Self {
        Self {
            subscribe: Vec::new(),
            rules: Vec::new(),
            republish_prefix: DEFAULT_REPUBLISH_PREFIX.into(),
        }
    }

    /// Add a subscription
    pub fn with_subscription(mut self, pattern: TopicFilter) -> Self {
        if !self.subscribe.contains(&pattern) {
            self.subscribe.push(pattern);
        }
        self
    }

    /// Append a forwarding rule
    pub fn with_rule(mut self, rule: ForwardingRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Set the republish prefix
    pub fn with_republish_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.republish_prefix = prefix.into();
        self
    }

    /// Check if a topic is one of our own republishes
    pub fn is_republished(&self, topic: &str) -> bool {
        topic
            .strip_prefix(self.republish_prefix.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }

    /// Validate the configuration
    pub fn validate(&self) -> BridgeResult<()> {
        let prefix = &self.republish_prefix;
        if prefix.is_empty() || prefix.contains(['+', '#']) || prefix.ends_with('/') {
            return Err(BridgeError::Config(format!(
                "republish_prefix '{}' must be a non-empty literal topic",
                prefix
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.subscribe, vec![TopicFilter::parse("energy/#").unwrap()]);
        assert_eq!(config.rules, vec![ForwardingRule::device_to_backend()]);
        assert_eq!(config.republish_prefix, "mesh");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_republished_topics() {
        let config = BridgeConfig::default();
        assert!(config.is_republished("mesh/n2/energy/device/7"));
        assert!(config.is_republished("mesh"));
        assert!(!config.is_republished("meshes/n2"));
        assert!(!config.is_republished("energy/device/7"));
    }

    #[test]
    fn test_bad_prefix_rejected() {
        assert!(BridgeConfig::default().with_republish_prefix("").validate().is_err());
        assert!(BridgeConfig::default().with_republish_prefix("mesh/#").validate().is_err());
        assert!(BridgeConfig::default().with_republish_prefix("mesh/").validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: BridgeConfig = serde_json::from_str(r#"{"republish_prefix": "relay"}"#).unwrap();
        assert_eq!(config.republish_prefix, "relay");
        assert_eq!(config.rules.len(), 1);
    }
}
