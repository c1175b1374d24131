//! Integration tests for registry mutations and snapshot publishing

use endpoint_registry::{Clock, Error, Registry, RegistryConfig};
use std::sync::Arc;

mod common;
use common::{RecordingDistributor, test_harness::TestHarness};

#[smol_potat::test]
async fn test_register_then_get_returns_fresh_record() {
    let harness = TestHarness::new().await.expect("Failed to create harness");

    harness.clock.advance(chrono::Duration::seconds(7));
    harness
        .registry
        .upsert("svc-1", "10.0.0.1", 8080)
        .await
        .expect("Failed to register");

    let record = harness.registry.get("svc-1").await.expect("Missing record");
    assert_eq!(record.address, "10.0.0.1");
    assert_eq!(record.port, 8080);
    assert_eq!(record.last_heartbeat, harness.clock.now());
}

#[smol_potat::test]
async fn test_empty_key_is_rejected_without_side_effects() {
    let harness = TestHarness::new().await.expect("Failed to create harness");
    let published = harness.distributor.published().len();

    let err = harness
        .registry
        .upsert("", "10.0.0.1", 8080)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert!(harness.registry.is_empty().await);
    assert_eq!(harness.distributor.published().len(), published);
}

#[smol_potat::test]
async fn test_deregister_removes_only_that_key() {
    let harness = TestHarness::new().await.expect("Failed to create harness");
    harness.registry.upsert("svc-1", "10.0.0.1", 8080).await.unwrap();
    harness.registry.upsert("svc-2", "10.0.0.2", 9090).await.unwrap();
    let published = harness.distributor.published().len();

    let err = harness.registry.remove("svc-3").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(harness.registry.len().await, 2);
    assert_eq!(harness.distributor.published().len(), published);

    harness.registry.remove("svc-1").await.unwrap();
    assert!(harness.registry.get("svc-1").await.is_err());
    assert!(harness.registry.get("svc-2").await.is_ok());
}

#[smol_potat::test]
async fn test_register_deregister_scenario() {
    let harness = TestHarness::new().await.expect("Failed to create harness");

    harness.registry.upsert("svc-2", "10.0.0.2", 9090).await.unwrap();
    harness.registry.upsert("svc-1", "10.0.0.1", 8080).await.unwrap();
    assert_eq!(
        harness.listed().await,
        vec![
            ("10.0.0.1".to_string(), 8080),
            ("10.0.0.2".to_string(), 9090)
        ]
    );

    harness.registry.remove("svc-1").await.unwrap();
    assert_eq!(harness.listed().await, vec![("10.0.0.2".to_string(), 9090)]);

    let last = harness.distributor.last().expect("Nothing published");
    assert_eq!(last.addresses(), vec![("10.0.0.2".to_string(), 9090)]);
    assert_eq!(last.cluster_name(), "cluster");
    assert!(harness.distributor.nodes().iter().all(|n| n == "eds-node"));
}

#[smol_potat::test]
async fn test_published_snapshot_matches_registry() {
    let harness = TestHarness::new().await.expect("Failed to create harness");

    for (key, port) in [("a", 1u16), ("b", 2), ("c", 3)] {
        harness.registry.upsert(key, "10.0.0.1", port).await.unwrap();
        let last = harness.distributor.last().unwrap();
        assert_eq!(last.addresses(), harness.listed().await);
        assert_eq!(last, harness.registry.latest_snapshot().await);
    }
}

#[smol_potat::test]
async fn test_identical_reregistration_keeps_endpoint_state() {
    let harness = TestHarness::new().await.expect("Failed to create harness");

    harness.registry.upsert("svc-1", "10.0.0.1", 8080).await.unwrap();
    let first = harness.registry.get("svc-1").await.unwrap();
    let first_snapshot = harness.distributor.last().unwrap();

    harness.clock.advance(chrono::Duration::seconds(5));
    harness.registry.upsert("svc-1", "10.0.0.1", 8080).await.unwrap();
    let second = harness.registry.get("svc-1").await.unwrap();
    let second_snapshot = harness.distributor.last().unwrap();

    assert_eq!((first.address, first.port), (second.address, second.port));
    assert!(second.last_heartbeat > first.last_heartbeat);
    assert_eq!(first_snapshot.version, second_snapshot.version);
    assert_eq!(first_snapshot.endpoints(), second_snapshot.endpoints());
}

#[smol_potat::test]
async fn test_versions_follow_commit_order() {
    let mut harness = TestHarness::new().await.expect("Failed to create harness");

    for i in 0..20u16 {
        harness
            .registry
            .upsert(&format!("svc-{i}"), "10.0.0.1", 8000 + i)
            .await
            .unwrap();
    }
    harness.drain().await;

    let versions: Vec<u64> = harness
        .distributor
        .published()
        .iter()
        .map(|s| s.version)
        .collect();
    assert_eq!(versions, (1..=21).collect::<Vec<_>>());
}

#[smol_potat::test]
async fn test_concurrent_distinct_registrations() {
    let harness = TestHarness::new().await.expect("Failed to create harness");

    let tasks: Vec<_> = (0..32u16)
        .map(|i| {
            let registry = harness.registry.clone();
            smol::spawn(async move {
                registry
                    .upsert(&format!("svc-{i}"), format!("10.0.1.{i}"), 9000)
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await.expect("Concurrent register failed");
    }

    assert_eq!(harness.registry.list().await.len(), 32);
    let last = harness.distributor.last().unwrap();
    assert_eq!(last.endpoints().len(), 32);
    assert_eq!(last.addresses(), harness.listed().await);
}

#[smol_potat::test]
async fn test_concurrent_same_key_mutations_stay_consistent() {
    let mut harness = TestHarness::new().await.expect("Failed to create harness");

    let tasks: Vec<_> = (0..40u16)
        .map(|i| {
            let registry = harness.registry.clone();
            smol::spawn(async move {
                if i % 2 == 0 {
                    registry.upsert("shared", "10.0.0.1", 7000 + i).await.map(|_| true)
                } else {
                    match registry.remove("shared").await {
                        Ok(()) => Ok(true),
                        Err(Error::NotFound(_)) => Ok(false),
                        Err(e) => Err(e),
                    }
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.expect("Unexpected error");
    }

    let listed = harness.listed().await;
    assert!(listed.len() <= 1);
    harness.drain().await;

    // The last delivered snapshot describes the final registry state
    let last = harness.distributor.last().unwrap();
    assert_eq!(last.addresses(), listed);

    // Every delivered snapshot held at most one endpoint, versions never went back
    let published = harness.distributor.published();
    assert!(published.iter().all(|s| s.endpoints().len() <= 1));
    assert!(published.windows(2).all(|w| w[0].version <= w[1].version));
}

#[smol_potat::test]
async fn test_publish_failure_is_reported_but_state_stands() {
    let harness = TestHarness::new().await.expect("Failed to create harness");

    harness.distributor.set_failing(true);
    let err = harness
        .registry
        .upsert("svc-1", "10.0.0.1", 8080)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PublishFailure(_)));
    assert!(harness.registry.get("svc-1").await.is_ok());

    let err = harness.registry.remove("svc-1").await.unwrap_err();
    assert!(matches!(err, Error::PublishFailure(_)));
    assert!(harness.registry.is_empty().await);

    harness.distributor.set_failing(false);
    harness.registry.upsert("svc-2", "10.0.0.2", 9090).await.unwrap();
    assert_eq!(
        harness.distributor.last().unwrap().addresses(),
        vec![("10.0.0.2".to_string(), 9090)]
    );
}

#[smol_potat::test]
async fn test_startup_failure_when_initial_snapshot_rejected() {
    let distributor = Arc::new(RecordingDistributor::new());
    distributor.set_failing(true);

    let (registry, publisher) = Registry::new(&RegistryConfig::default(), distributor);
    smol::spawn(publisher.run()).detach();

    let err = registry.publish_initial().await.unwrap_err();
    assert!(matches!(err, Error::StartupFailure(_)));
}

#[smol_potat::test]
async fn test_closed_registry_reports_publish_failure() {
    let mut harness = TestHarness::new().await.expect("Failed to create harness");
    harness.drain().await;

    let err = harness
        .registry
        .upsert("svc-1", "10.0.0.1", 8080)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PublishFailure(_)));
    assert!(harness.registry.get("svc-1").await.is_ok());
}
