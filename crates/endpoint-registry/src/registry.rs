//! Core endpoint registry implementation

use crate::{
    clock::{Clock, SystemClock},
    config::RegistryConfig,
    distributor::Distributor,
    error::{Error, Result},
    models::EndpointRecord,
    publisher::{self, PublishGate, Publisher},
    snapshot::{self, Snapshot},
};
use chrono::{DateTime, Utc};
use futures::lock::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Endpoint registry.
///
/// Every mutation holds the registry lock while it updates the map,
/// rebuilds the snapshot and queues it for publishing, so snapshots reach
/// the distributor in commit order and always match a real registry state.
pub struct Registry {
    state: Mutex<RegistryState>,
    gate: PublishGate,
    clock: Arc<dyn Clock>,
    cluster_name: String,
}

struct RegistryState {
    endpoints: HashMap<String, EndpointRecord>,
    latest: Arc<Snapshot>,
}

impl RegistryState {
    fn rebuild(&mut self, cluster_name: &str) -> Arc<Snapshot> {
        let next = snapshot::build(cluster_name, Some(self.latest.as_ref()), self.endpoints.values());
        self.latest = Arc::new(next);
        self.latest.clone()
    }
}

impl Registry {
    /// Create a registry using the system clock.
    ///
    /// The returned [`Publisher`] must be driven (e.g. spawned) for
    /// mutations to complete.
    pub fn new(config: &RegistryConfig, distributor: Arc<dyn Distributor>) -> (Self, Publisher) {
        Self::with_clock(config, distributor, Arc::new(SystemClock))
    }

    /// Create a registry with a custom clock
    pub fn with_clock(
        config: &RegistryConfig,
        distributor: Arc<dyn Distributor>,
        clock: Arc<dyn Clock>,
    ) -> (Self, Publisher) {
        let (gate, publisher) = publisher::channel(distributor, config.node_id.clone());
        let initial = snapshot::build(&config.cluster_name, None, std::iter::empty());

        let registry = Self {
            state: Mutex::new(RegistryState {
                endpoints: HashMap::new(),
                latest: Arc::new(initial),
            }),
            gate,
            clock,
            cluster_name: config.cluster_name.clone(),
        };

        (registry, publisher)
    }

    /// Publish the initial snapshot.
    ///
    /// Fails with [`Error::StartupFailure`] if the distributor does not
    /// accept it; the process must not serve in that case.
    pub async fn publish_initial(&self) -> Result<()> {
        let ack = {
            let state = self.state.lock().await;
            self.gate.submit(state.latest.clone())
        };

        let result = match ack {
            Ok(ack) => publisher::acknowledged(ack).await,
            Err(e) => Err(e),
        };

        result
            .map_err(|e| Error::StartupFailure(format!("initial snapshot not accepted: {}", e)))?;
        info!("Initial snapshot published for cluster {}", self.cluster_name);
        Ok(())
    }

    /// Current time according to the registry clock
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// List all endpoints, sorted by address then port
    pub async fn list(&self) -> Vec<EndpointRecord> {
        let state = self.state.lock().await;
        let mut entries: Vec<(&String, &EndpointRecord)> = state.endpoints.iter().collect();
        entries.sort_by(|(ka, a), (kb, b)| a.sort_key().cmp(&b.sort_key()).then_with(|| ka.cmp(kb)));
        entries.into_iter().map(|(_, record)| record.clone()).collect()
    }

    /// Get the endpoint registered under `key`
    pub async fn get(&self, key: &str) -> Result<EndpointRecord> {
        self.state
            .lock()
            .await
            .endpoints
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    /// Number of registered endpoints
    pub async fn len(&self) -> usize {
        self.state.lock().await.endpoints.len()
    }

    /// Whether no endpoint is registered
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Latest snapshot built from the registry contents
    pub async fn latest_snapshot(&self) -> Arc<Snapshot> {
        self.state.lock().await.latest.clone()
    }

    /// Register or refresh an endpoint.
    ///
    /// The heartbeat is reset even if address and port are unchanged. A
    /// [`Error::PublishFailure`] means the registry was updated but the
    /// distributor did not take the new snapshot.
    pub async fn upsert(&self, key: &str, address: impl Into<String>, port: u16) -> Result<()> {
        if key.is_empty() {
            return Err(Error::InvalidArgument("key cannot be empty".to_string()));
        }

        let ack = {
            let mut state = self.state.lock().await;
            let record = EndpointRecord::new(address, port, self.clock.now());
            debug!("Upserting {} -> {}:{}", key, record.address, record.port);
            state.endpoints.insert(key.to_string(), record);

            let snapshot = state.rebuild(&self.cluster_name);
            self.gate.submit(snapshot)?
        };

        publisher::acknowledged(ack).await
    }

    /// Remove an endpoint.
    ///
    /// Same publish semantics as [`Registry::upsert`].
    pub async fn remove(&self, key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(Error::InvalidArgument("key cannot be empty".to_string()));
        }

        let ack = {
            let mut state = self.state.lock().await;
            if state.endpoints.remove(key).is_none() {
                return Err(Error::NotFound(key.to_string()));
            }
            debug!("Removed {}", key);

            let snapshot = state.rebuild(&self.cluster_name);
            self.gate.submit(snapshot)?
        };

        publisher::acknowledged(ack).await
    }

    /// Remove every endpoint whose heartbeat is older than `timeout` at `now`.
    ///
    /// A non-positive timeout disables eviction. A snapshot is published
    /// only if something was removed; delivery failures are logged and
    /// left for [`Registry::retry_publish`].
    pub async fn sweep(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> usize {
        if timeout <= chrono::Duration::zero() {
            return 0;
        }

        let mut state = self.state.lock().await;
        let before = state.endpoints.len();
        state.endpoints.retain(|key, record| {
            let expired = record.is_expired(now, timeout);
            if expired {
                info!(
                    "Evicting {} ({}:{}), last heartbeat {}",
                    key, record.address, record.port, record.last_heartbeat
                );
            }
            !expired
        });
        let removed = before - state.endpoints.len();

        if removed > 0 {
            let snapshot = state.rebuild(&self.cluster_name);
            if let Err(e) = self.gate.submit_detached(snapshot) {
                warn!("Failed to queue snapshot after eviction: {}", e);
            }
        }

        removed
    }

    /// Re-queue the latest snapshot if the last delivery failed.
    ///
    /// Returns whether a snapshot was queued.
    pub async fn retry_publish(&self) -> bool {
        if !self.gate.needs_retry() {
            return false;
        }

        let state = self.state.lock().await;
        match self.gate.submit_detached(state.latest.clone()) {
            Ok(()) => {
                debug!("Re-queued snapshot version {}", state.latest.version);
                true
            }
            Err(e) => {
                warn!("Failed to re-queue snapshot: {}", e);
                false
            }
        }
    }

    /// Stop publishing; the publisher drains queued snapshots and exits
    pub fn close(&self) {
        if self.gate.close() {
            info!("Registry publish queue closed");
        }
    }
}
