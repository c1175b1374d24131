//! Test harness utilities for integration testing

use super::RecordingDistributor;
use chrono::TimeZone;
use endpoint_registry::{ManualClock, Registry, RegistryConfig};
use std::sync::Arc;

/// A registry wired to a recording distributor and a manual clock
pub struct TestHarness {
    pub registry: Arc<Registry>,
    pub distributor: Arc<RecordingDistributor>,
    pub clock: Arc<ManualClock>,
    pub config: RegistryConfig,
    publisher: Option<smol::Task<()>>,
}

impl TestHarness {
    /// Create a harness with the default configuration
    pub async fn new() -> anyhow::Result<Self> {
        Self::with_config(RegistryConfig::default()).await
    }

    /// Create a harness and publish the initial snapshot
    pub async fn with_config(config: RegistryConfig) -> anyhow::Result<Self> {
        let distributor = Arc::new(RecordingDistributor::new());
        let start = chrono::Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));

        let (registry, publisher) =
            Registry::with_clock(&config, distributor.clone(), clock.clone());
        let publisher = smol::spawn(publisher.run());

        let registry = Arc::new(registry);
        registry.publish_initial().await?;

        Ok(Self {
            registry,
            distributor,
            clock,
            config,
            publisher: Some(publisher),
        })
    }

    /// Close the publish queue and wait until every queued snapshot is delivered
    pub async fn drain(&mut self) {
        self.registry.close();
        if let Some(task) = self.publisher.take() {
            task.await;
        }
    }

    /// `(address, port)` pairs currently listed by the registry
    pub async fn listed(&self) -> Vec<(String, u16)> {
        self.registry
            .list()
            .await
            .into_iter()
            .map(|r| (r.address, r.port))
            .collect()
    }
}
