//! Common test utilities for endpoint registry integration tests

pub mod test_harness;
pub mod websocket_client;

use async_trait::async_trait;
use endpoint_registry::{Distributor, Error, Result, Snapshot};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Test timeout for async operations
pub const TEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Distributor that records every snapshot and can be told to fail
#[derive(Default)]
pub struct RecordingDistributor {
    published: Mutex<Vec<(String, Arc<Snapshot>)>>,
    failing: AtomicBool,
}

impl RecordingDistributor {
    /// Create a distributor that accepts everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent publishes fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// All accepted snapshots, in delivery order
    pub fn published(&self) -> Vec<Arc<Snapshot>> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(_, s)| s.clone())
            .collect()
    }

    /// Most recently accepted snapshot
    pub fn last(&self) -> Option<Arc<Snapshot>> {
        self.published().last().cloned()
    }

    /// Node identities snapshots were published under
    pub fn nodes(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(n, _)| n.clone())
            .collect()
    }
}

#[async_trait]
impl Distributor for RecordingDistributor {
    async fn publish(&self, node_id: &str, snapshot: Arc<Snapshot>) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::PublishFailure("distributor unavailable".to_string()));
        }
        self.published
            .lock()
            .unwrap()
            .push((node_id.to_string(), snapshot));
        Ok(())
    }
}

/// Poll `condition` until it holds or [`TEST_TIMEOUT`] passes
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + TEST_TIMEOUT;
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        smol::Timer::after(Duration::from_millis(10)).await;
    }
    condition()
}
