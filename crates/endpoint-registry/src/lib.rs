//! Heartbeat-driven endpoint registry with snapshot publishing
//!
//! Clients register endpoints (host/port pairs) under a key and keep them
//! alive by registering again. Endpoints that stop heartbeating are evicted.
//! Every change produces a new versioned [`Snapshot`] that is handed, in
//! commit order, to a [`Distributor`] for delivery to downstream
//! subscribers.
//!
//! # Architecture
//!
//! - [`Registry`] owns the endpoint map. Each mutation rebuilds the
//!   snapshot and queues it while holding the registry lock.
//! - [`Publisher`] is the single consumer of that queue and calls the
//!   distributor outside the lock.
//! - [`EvictionScheduler`] sweeps the registry on a fixed tick and retries
//!   snapshots whose delivery failed.
//! - [`WsServer`] exposes list/get/register/deregister and snapshot
//!   streaming over WebSocket.
//!
//! Like the rest of the crate the server is runtime-agnostic: the caller
//! decides how to spawn the publisher, scheduler and connection handlers.
//!
//! # Example
//!
//! ```no_run
//! use endpoint_registry::{Registry, RegistryConfig, SnapshotCache, WsServer};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = RegistryConfig::default();
//! let cache = Arc::new(SnapshotCache::new());
//! let (registry, publisher) = Registry::new(&config, cache.clone());
//! let registry = Arc::new(registry);
//!
//! // User chooses how to run the publisher, e.g. smol::spawn
//! # let _ = publisher;
//! registry.publish_initial().await?;
//!
//! let server = WsServer::new("127.0.0.1:8080", registry.clone(), cache, config.node_id).await?;
//! let (_stop, shutdown) = async_channel::bounded::<()>(1);
//! server
//!     .serve(
//!         shutdown,
//!         |handler| {
//!             // e.g., smol::spawn(handler).detach()
//! #           let _ = handler;
//!         },
//!         Duration::from_secs(10),
//!     )
//!     .await?;
//!
//! // In-flight requests are answered; safe to stop publishing
//! registry.close();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod client;
pub mod clock;
pub mod config;
pub mod distributor;
pub mod error;
pub mod eviction;
pub mod models;
pub mod publisher;
pub mod registry;
pub mod snapshot;
pub mod websocket;

pub use client::{WsClient, WsClientHandle};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{RegistryConfig, ServerConfig};
pub use distributor::{Distributor, SnapshotCache};
pub use error::{Error, Result};
pub use eviction::{EVICTION_TICK_INTERVAL, EvictionScheduler, StopHandle, TickOutcome};
pub use models::*;
pub use publisher::{PublishGate, Publisher};
pub use registry::Registry;
pub use snapshot::{ClusterLoadAssignment, LbEndpoint, Snapshot};
pub use websocket::{ConnectionHandler, WsServer};

/// Re-export key types for convenience
pub mod prelude {
    pub use crate::{
        Distributor, EndpointRecord, Error, EvictionScheduler, Registry, RegistryConfig, Result,
        Snapshot, SnapshotCache,
    };
}
