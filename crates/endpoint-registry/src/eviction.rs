//! Heartbeat-timeout eviction

use crate::registry::Registry;
use futures::StreamExt;
use futures::future::{self, Either};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Interval between eviction sweeps
pub const EVICTION_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Periodically sweeps the registry for endpoints that stopped heartbeating
pub struct EvictionScheduler {
    registry: Arc<Registry>,
    timeout: chrono::Duration,
    stop: async_channel::Receiver<()>,
}

/// Stops a running [`EvictionScheduler`].
///
/// Dropping the handle stops the scheduler as well.
#[derive(Clone)]
pub struct StopHandle {
    tx: async_channel::Sender<()>,
}

impl StopHandle {
    /// Request a stop; a tick already in progress runs to completion
    pub fn stop(&self) {
        self.tx.close();
    }
}

/// Result of a single tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickOutcome {
    /// Endpoints removed by the sweep
    pub evicted: usize,
    /// Whether a previously failed snapshot was queued again
    pub republished: bool,
}

impl EvictionScheduler {
    /// Create a scheduler and its stop handle
    pub fn new(registry: Arc<Registry>, timeout: chrono::Duration) -> (Self, StopHandle) {
        let (tx, rx) = async_channel::bounded(1);
        let scheduler = Self {
            registry,
            timeout,
            stop: rx,
        };
        (scheduler, StopHandle { tx })
    }

    /// Run one sweep now, then re-queue a snapshot whose delivery failed.
    ///
    /// With a non-positive timeout eviction is disabled and the tick does
    /// nothing at all.
    pub async fn tick(&self) -> TickOutcome {
        if self.timeout <= chrono::Duration::zero() {
            return TickOutcome::default();
        }

        let evicted = self.registry.sweep(self.registry.now(), self.timeout).await;
        if evicted > 0 {
            info!("Evicted {} endpoint(s) after heartbeat timeout", evicted);
        }
        let republished = self.registry.retry_publish().await;

        TickOutcome {
            evicted,
            republished,
        }
    }

    /// Tick every [`EVICTION_TICK_INTERVAL`] until stopped
    pub async fn run(self) {
        self.run_every(EVICTION_TICK_INTERVAL).await
    }

    /// Tick on a custom interval until stopped
    pub async fn run_every(self, interval: Duration) {
        if self.timeout <= chrono::Duration::zero() {
            info!("Eviction disabled (timeout {}s)", self.timeout.num_seconds());
        } else {
            info!(
                "Eviction scheduler started (timeout {}s, tick {:?})",
                self.timeout.num_seconds(),
                interval
            );
        }

        let mut ticker = async_io::Timer::interval(interval);
        loop {
            if self.stop.is_closed() {
                break;
            }

            let stopped = {
                let stop = self.stop.recv();
                futures::pin_mut!(stop);
                match future::select(ticker.next(), stop).await {
                    Either::Left(_) => false,
                    Either::Right(_) => true,
                }
            };
            if stopped {
                break;
            }

            let outcome = self.tick().await;
            debug!("Eviction tick: {:?}", outcome);
        }

        info!("Eviction scheduler stopped");
    }
}
