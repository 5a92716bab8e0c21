//! Backend sink
//!
//! On a gateway node, packets addressed to `backend` end up here. The
//! production sink POSTs one JSON record per message to the backend's
//! ingest endpoint.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use gridmesh_core::NodeId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::BridgeError;

/// One telemetry message as the backend receives it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendRecord {
    /// The gateway that handed this to the backend
    pub node_id: NodeId,
    /// The node whose bus produced the message
    pub source: NodeId,
    /// Original bus topic
    pub topic: String,
    /// Base64 of the original payload
    pub payload: String,
    /// When the gateway received it
    pub received_at: DateTime<Utc>,
}

impl BackendRecord {
    /// Build a record, encoding the payload
    pub fn new(node_id: NodeId, source: NodeId, topic: String, payload: &[u8]) -> Self {
        Self {
            node_id,
            source,
            topic,
            payload: STANDARD.encode(payload),
            received_at: Utc::now(),
        }
    }

    /// Decode the payload back to bytes
    pub fn payload_bytes(&self) -> Result<Vec<u8>, BridgeError> {
        STANDARD
            .decode(&self.payload)
            .map_err(|e| BridgeError::Translation(e.to_string()))
    }
}

/// Where backend-bound messages go
#[async_trait]
pub trait BackendSink: Send + Sync + 'static {
    /// Hand one record to the backend
    async fn deliver(&self, record: &BackendRecord) -> Result<(), BridgeError>;
}

/// Backend endpoint settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the backend
    pub url: String,
    /// Path records are POSTed to
    pub ingest_path: String,
    /// Bearer token, if the backend wants one
    pub token: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "https://api.los-tecnicos.com".into(),
            ingest_path: "/api/v1/mesh/ingest".into(),
            token: None,
            timeout_secs: 10,
        }
    }
}

impl BackendConfig {
    /// Full ingest URL
    pub fn ingest_url(&self) -> String {
        format!(
            "{}/{}",
            self.url.trim_end_matches('/'),
            self.ingest_path.trim_start_matches('/')
        )
    }
}

/// HTTP(S) backend sink
pub struct HttpBackend {
    client: reqwest::Client,
    ingest_url: String,
    token: Option<String>,
}

impl HttpBackend {
    /// Create a sink for the configured endpoint
    pub fn new(config: &BackendConfig) -> Result<Self, BridgeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            ingest_url: config.ingest_url(),
            token: config.token.clone(),
        })
    }

    /// The URL records are POSTed to
    pub fn ingest_url(&self) -> &str {
        &self.ingest_url
    }
}

#[async_trait]
impl BackendSink for HttpBackend {
    async fn deliver(&self, record: &BackendRecord) -> Result<(), BridgeError> {
        let mut request = self.client.post(&self.ingest_url).json(record);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            BridgeError::Backend(format!("Failed to reach backend: {}", e))
        })?;

        if response.status().is_success() {
            debug!(source = %record.source, topic = %record.topic, "Record accepted by backend");
            Ok(())
        } else {
            Err(BridgeError::Backend(format!(
                "Backend rejected record: {}",
                response.status()
            )))
        }
    }
}

/// Sink that keeps records in memory
#[derive(Default)]
pub struct MemoryBackend {
    records: Mutex<Vec<BackendRecord>>,
    fail: Mutex<bool>,
}

impl MemoryBackend {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every delivery fail (or succeed again)
    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock() = fail;
    }

    /// Records delivered so far
    pub fn records(&self) -> Vec<BackendRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl BackendSink for MemoryBackend {
    async fn deliver(&self, record: &BackendRecord) -> Result<(), BridgeError> {
        if *self.fail.lock() {
            return Err(BridgeError::Backend("backend unavailable".into()));
        }
        self.records.lock().push(record.clone());
        Ok(())
    }
}
