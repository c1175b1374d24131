//! Snapshot distribution
//!
//! The [`Distributor`] trait is the boundary to whatever streams snapshots
//! to downstream subscribers. [`SnapshotCache`] is the in-process
//! implementation: it keeps the latest snapshot per node and fans new
//! versions out to watchers.

use crate::{
    error::{Error, Result},
    snapshot::Snapshot,
};
use async_trait::async_trait;
use futures::lock::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Receives every snapshot the registry publishes
#[async_trait]
pub trait Distributor: Send + Sync {
    /// Make `snapshot` the current configuration for `node_id`.
    ///
    /// Publishing a version that is already current must be a no-op.
    async fn publish(&self, node_id: &str, snapshot: Arc<Snapshot>) -> Result<()>;
}

/// In-memory snapshot cache keyed by node identity
pub struct SnapshotCache {
    snapshots: Mutex<HashMap<String, Arc<Snapshot>>>,
    watchers: Mutex<HashMap<String, Vec<async_channel::Sender<Arc<Snapshot>>>>>,
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            snapshots: Mutex::new(HashMap::new()),
            watchers: Mutex::new(HashMap::new()),
        }
    }

    /// Latest snapshot for a node
    pub async fn snapshot(&self, node_id: &str) -> Option<Arc<Snapshot>> {
        self.snapshots.lock().await.get(node_id).cloned()
    }

    /// Watch a node's snapshots.
    ///
    /// The receiver first yields the current snapshot (if any), then every
    /// newer version as it is published.
    pub async fn watch(&self, node_id: &str) -> async_channel::Receiver<Arc<Snapshot>> {
        let (tx, rx) = async_channel::unbounded();

        // Hold the snapshot lock so no publish slips in between the
        // initial send and the registration.
        let snapshots = self.snapshots.lock().await;
        if let Some(current) = snapshots.get(node_id) {
            let _ = tx.try_send(current.clone());
        }
        self.watchers
            .lock()
            .await
            .entry(node_id.to_string())
            .or_default()
            .push(tx);

        rx
    }

    /// Number of live watchers for a node
    pub async fn watcher_count(&self, node_id: &str) -> usize {
        self.watchers
            .lock()
            .await
            .get(node_id)
            .map(|w| w.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Distributor for SnapshotCache {
    async fn publish(&self, node_id: &str, snapshot: Arc<Snapshot>) -> Result<()> {
        snapshot.validate()?;

        let mut snapshots = self.snapshots.lock().await;
        if let Some(current) = snapshots.get(node_id) {
            if current.version == snapshot.version {
                debug!(
                    "Snapshot version {} already current for node {}",
                    snapshot.version, node_id
                );
                return Ok(());
            }
            if current.version > snapshot.version {
                return Err(Error::PublishFailure(format!(
                    "stale snapshot version {} for node {} (current {})",
                    snapshot.version, node_id, current.version
                )));
            }
        }
        snapshots.insert(node_id.to_string(), snapshot.clone());

        let mut watchers = self.watchers.lock().await;
        if let Some(list) = watchers.get_mut(node_id) {
            list.retain(|tx| tx.try_send(snapshot.clone()).is_ok());
        }

        debug!(
            "Node {} now at snapshot version {} ({} endpoints)",
            node_id,
            snapshot.version,
            snapshot.endpoints().len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EndpointRecord;
    use crate::snapshot;
    use chrono::Utc;

    fn snapshot_with(previous: Option<&Snapshot>, ports: &[u16]) -> Snapshot {
        let records: Vec<_> = ports
            .iter()
            .map(|p| EndpointRecord::new("10.0.0.1", *p, Utc::now()))
            .collect();
        snapshot::build("cluster", previous, &records)
    }

    #[smol_potat::test]
    async fn test_publish_and_fetch() {
        let cache = SnapshotCache::new();
        assert!(cache.snapshot("node").await.is_none());

        let snap = Arc::new(snapshot_with(None, &[8080]));
        cache.publish("node", snap.clone()).await.unwrap();

        assert_eq!(cache.snapshot("node").await, Some(snap));
        assert!(cache.snapshot("other").await.is_none());
    }

    #[smol_potat::test]
    async fn test_repeated_version_is_noop() {
        let cache = SnapshotCache::new();
        let first = Arc::new(snapshot_with(None, &[8080]));
        cache.publish("node", first.clone()).await.unwrap();

        let rx = cache.watch("node").await;
        assert_eq!(rx.recv().await.unwrap(), first);

        cache.publish("node", first.clone()).await.unwrap();
        assert!(rx.try_recv().is_err());

        let second = Arc::new(snapshot_with(Some(&first), &[8080, 8081]));
        cache.publish("node", second.clone()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), second);
    }

    #[smol_potat::test]
    async fn test_rejects_stale_and_invalid_snapshots() {
        let cache = SnapshotCache::new();
        let first = Arc::new(snapshot_with(None, &[8080]));
        let second = Arc::new(snapshot_with(Some(&first), &[8081]));
        cache.publish("node", second).await.unwrap();

        let err = cache.publish("node", first).await.unwrap_err();
        assert!(matches!(err, Error::PublishFailure(_)));

        let invalid = Arc::new(snapshot::build("", None, std::iter::empty()));
        let err = cache.publish("node", invalid).await.unwrap_err();
        assert!(matches!(err, Error::PublishFailure(_)));
    }

    #[smol_potat::test]
    async fn test_dropped_watchers_are_pruned() {
        let cache = SnapshotCache::new();
        let rx = cache.watch("node").await;
        assert_eq!(cache.watcher_count("node").await, 1);
        drop(rx);

        let snap = Arc::new(snapshot_with(None, &[8080]));
        cache.publish("node", snap).await.unwrap();
        assert_eq!(cache.watcher_count("node").await, 0);
    }
}
