//! MQTT client for the node-local broker
//!
//! The rumqttc event loop runs in its own task. Incoming publishes are fanned
//! out on a broadcast channel; subscriptions are replayed on every
//! (re)connect so that a broker restart does not silently stop the bridge.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::bus::{BUS_CHANNEL_CAPACITY, BusMessage, LocalBus};
use crate::error::BridgeError;
use crate::topic::TopicFilter;

/// Broker connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Broker host
    pub host: String,
    /// Broker port
    pub port: u16,
    /// Client id; derived from the node id when absent
    pub client_id: Option<String>,
    /// Keep-alive interval in seconds
    pub keep_alive_secs: u64,
    /// Pause before polling again after a connection error
    pub reconnect_delay_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: None,
            keep_alive_secs: 30,
            reconnect_delay_secs: 5,
        }
    }
}

/// [`LocalBus`] backed by an MQTT broker
pub struct MqttBus {
    client: AsyncClient,
    patterns: Arc<RwLock<Vec<TopicFilter>>>,
    inbound: broadcast::Sender<BusMessage>,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl MqttBus {
    /// Connect to the broker
    ///
    /// Returns immediately; the connection is made (and remade) by the
    /// event loop task.
    pub fn connect(config: &MqttConfig, node_id: &str) -> Self {
        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("gridmesh-{}", node_id));

        let mut options = MqttOptions::new(client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));

        let (client, mut event_loop) = AsyncClient::new(options, 64);
        let (inbound, _) = broadcast::channel(BUS_CHANNEL_CAPACITY);
        let patterns: Arc<RwLock<Vec<TopicFilter>>> = Arc::new(RwLock::new(Vec::new()));

        info!(
            client_id = %client_id,
            broker = %format!("{}:{}", config.host, config.port),
            "Connecting to local broker"
        );

        let task_client = client.clone();
        let task_patterns = patterns.clone();
        let task_inbound = inbound.clone();
        let reconnect_delay = Duration::from_secs(config.reconnect_delay_secs);

        let event_task = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Connected to local broker");
                        for pattern in task_patterns.read().iter() {
                            if let Err(e) =
                                task_client.try_subscribe(pattern.as_str(), QoS::AtLeastOnce)
                            {
                                warn!(pattern = %pattern, error = %e, "Resubscribe failed");
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        debug!(topic = %publish.topic, len = publish.payload.len(), "Bus message");
                        let _ = task_inbound.send(BusMessage::new(publish.topic, publish.payload));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Broker connection lost, reconnecting");
                        tokio::time::sleep(reconnect_delay).await;
                    }
                }
            }
        }
        .instrument(info_span!("mqtt_events")));

        Self {
            client,
            patterns,
            inbound,
            event_task: Mutex::new(Some(event_task)),
        }
    }

    /// Disconnect and stop the event loop
    pub async fn disconnect(&self) {
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "Disconnect request failed");
        }
        let task = self.event_task.lock().take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for MqttBus {
    fn drop(&mut self) {
        if let Some(task) = self.event_task.lock().take() {
            task.abort();
        }
    }
}

#[async_trait]
impl LocalBus for MqttBus {
    async fn subscribe(&self, pattern: &TopicFilter) -> Result<(), BridgeError> {
        {
            let mut patterns = self.patterns.write();
            if patterns.contains(pattern) {
                return Ok(());
            }
            patterns.push(pattern.clone());
        }
        self.client
            .subscribe(pattern.as_str(), QoS::AtLeastOnce)
            .await?;
        info!(pattern = %pattern, "Subscribed");
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BridgeError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
            .await?;
        Ok(())
    }

    fn messages(&self) -> broadcast::Receiver<BusMessage> {
        self.inbound.subscribe()
    }
}
