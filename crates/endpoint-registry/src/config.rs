//! Configuration structures for the endpoint registry

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Environment variable overriding the node identity
pub const ENV_NODE_ID: &str = "NODE_ID";
/// Environment variable overriding the heartbeat timeout, in seconds
pub const ENV_EVICTION_TIMEOUT: &str = "EVICTION_TIMEOUT_IN_SEC";
/// Environment variable overriding the control plane listen address
pub const ENV_LISTEN_ADDR: &str = "LISTEN_ADDR";

/// Endpoint registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Node identity snapshots are published under
    #[serde(default = "default_node_id")]
    pub node_id: String,
    /// Cluster name carried by every snapshot
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,
    /// Heartbeat timeout in seconds; zero or negative disables eviction
    #[serde(default = "default_eviction_timeout")]
    pub eviction_timeout_secs: i64,
    /// Control plane server configuration
    #[serde(default)]
    pub server: ServerConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address (e.g., "127.0.0.1:8080")
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
        }
    }
}

fn default_node_id() -> String {
    "eds-node".to_string()
}

fn default_cluster_name() -> String {
    "cluster".to_string()
}

fn default_eviction_timeout() -> i64 {
    42
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            cluster_name: default_cluster_name(),
            eviction_timeout_secs: default_eviction_timeout(),
            server: ServerConfig::default(),
        }
    }
}

impl RegistryConfig {
    /// Load configuration from file
    pub async fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use async_fs::File;
        use futures::io::AsyncReadExt;

        let mut file = File::open(path.as_ref()).await?;
        let mut contents = String::new();
        file.read_to_string(&mut contents).await?;

        // Try YAML first, then JSON
        if path.as_ref().extension().and_then(|s| s.to_str()) == Some("yaml")
            || path.as_ref().extension().and_then(|s| s.to_str()) == Some("yml")
        {
            Ok(serde_yaml::from_str(&contents)?)
        } else {
            Ok(serde_json::from_str(&contents)?)
        }
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let lookup = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(node_id) = lookup(ENV_NODE_ID) {
            self.node_id = node_id;
        }
        if let Some(timeout) = lookup(ENV_EVICTION_TIMEOUT) {
            self.eviction_timeout_secs = timeout.trim().parse().map_err(|_| {
                Error::Config(format!(
                    "{} must be a whole number of seconds, got {:?}",
                    ENV_EVICTION_TIMEOUT, timeout
                ))
            })?;
        }
        if let Some(addr) = lookup(ENV_LISTEN_ADDR) {
            self.server.listen_addr = addr;
        }

        Ok(())
    }

    /// Heartbeat timeout as a signed duration
    pub fn eviction_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.eviction_timeout_secs)
    }

    /// Whether stale endpoints are evicted at all
    pub fn eviction_enabled(&self) -> bool {
        self.eviction_timeout_secs > 0
    }
}
