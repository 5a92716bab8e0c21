//! Local publish/subscribe bus
//!
//! The bridge talks to the bus only through [`LocalBus`]. Production nodes
//! use [`MqttBus`](crate::MqttBus) against the broker on the Pi; tests and
//! single-process setups use [`MemoryBus`].

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;

use crate::error::BridgeError;
use crate::topic::TopicFilter;

/// Capacity of the inbound message channel
pub const BUS_CHANNEL_CAPACITY: usize = 256;

/// A message received from the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Topic it was published on
    pub topic: String,
    /// Raw payload
    pub payload: Bytes,
}

impl BusMessage {
    /// Create a message
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Operations the bridge needs from a pub/sub bus
#[async_trait]
pub trait LocalBus: Send + Sync + 'static {
    /// Start receiving messages on topics matching `pattern`
    async fn subscribe(&self, pattern: &TopicFilter) -> Result<(), BridgeError>;

    /// Publish a message
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BridgeError>;

    /// Stream of messages on subscribed topics
    fn messages(&self) -> broadcast::Receiver<BusMessage>;
}

/// In-process bus
///
/// Every publish, including the bridge's own republishes, is recorded and
/// delivered to subscribers whose filters match.
pub struct MemoryBus {
    subscriptions: RwLock<Vec<TopicFilter>>,
    inbound: broadcast::Sender<BusMessage>,
    published: Mutex<Vec<BusMessage>>,
}

impl MemoryBus {
    /// Create an empty bus
    pub fn new() -> Self {
        let (inbound, _) = broadcast::channel(BUS_CHANNEL_CAPACITY);
        Self {
            subscriptions: RwLock::new(Vec::new()),
            inbound,
            published: Mutex::new(Vec::new()),
        }
    }

    /// Every message published so far
    pub fn published(&self) -> Vec<BusMessage> {
        self.published.lock().clone()
    }

    /// Messages published on topics matching `filter`
    pub fn published_matching(&self, filter: &TopicFilter) -> Vec<BusMessage> {
        self.published
            .lock()
            .iter()
            .filter(|m| filter.matches(&m.topic))
            .cloned()
            .collect()
    }

    /// Current subscriptions
    pub fn subscriptions(&self) -> Vec<TopicFilter> {
        self.subscriptions.read().clone()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalBus for MemoryBus {
    async fn subscribe(&self, pattern: &TopicFilter) -> Result<(), BridgeError> {
        let mut subscriptions = self.subscriptions.write();
        if !subscriptions.contains(pattern) {
            subscriptions.push(pattern.clone());
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BridgeError> {
        let message = BusMessage::new(topic, payload);
        self.published.lock().push(message.clone());

        let subscribed = self.subscriptions.read().iter().any(|f| f.matches(topic));
        if subscribed {
            // No live receiver just means nobody is listening yet
            let _ = self.inbound.send(message);
        }
        Ok(())
    }

    fn messages(&self) -> broadcast::Receiver<BusMessage> {
        self.inbound.subscribe()
    }
}
