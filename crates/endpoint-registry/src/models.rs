//! Data models for the endpoint registry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRecord {
    /// Host name or IP address
    pub address: String,

    /// Port number
    pub port: u16,

    /// Last successful registration of this key
    pub last_heartbeat: DateTime<Utc>,
}

impl EndpointRecord {
    /// Create a record with a fresh heartbeat
    pub fn new(address: impl Into<String>, port: u16, now: DateTime<Utc>) -> Self {
        Self {
            address: address.into(),
            port,
            last_heartbeat: now,
        }
    }

    /// Whether the heartbeat is older than `timeout` at `now`
    pub fn is_expired(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        now.signed_duration_since(self.last_heartbeat) > timeout
    }

    /// Deterministic ordering key: address, then port
    pub fn sort_key(&self) -> (&str, u16) {
        (&self.address, self.port)
    }
}

/// Registration request as sent by clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyedEndpoint {
    /// Client-supplied identifier
    pub key: String,
    /// Host name or IP address
    pub address: String,
    /// Port number
    pub port: u16,
}

/// WebSocket message types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// Client request
    Request {
        /// Request ID for correlation
        id: String,
        /// Action to perform
        action: Action,
        /// Action parameters
        #[serde(default)]
        params: serde_json::Value,
    },
    /// Server response
    Response {
        /// Request ID
        id: String,
        /// Response data
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
        /// Error information
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<ErrorInfo>,
    },
    /// Server-pushed event
    Event {
        /// Event type
        event: EventType,
        /// Event data
        data: serde_json::Value,
    },
}

/// Available actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// List all endpoints
    ListEndpoints,
    /// Get the endpoint registered under a key
    GetEndpoint,
    /// Register or refresh an endpoint (heartbeat)
    Register,
    /// Remove an endpoint
    Deregister,
    /// Fetch the latest published snapshot
    GetSnapshot,
    /// Stream published snapshots over this connection
    WatchSnapshots,
}

/// Event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A new snapshot was delivered to the distributor
    SnapshotPublished,
}

/// Error information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error code
    pub code: String,
    /// Error message
    pub message: String,
    /// Additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}
