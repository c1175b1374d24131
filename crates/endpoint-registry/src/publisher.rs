//! Ordered hand-off of snapshots to the distributor
//!
//! The registry builds a snapshot and submits it to the [`PublishGate`]
//! while still holding its lock, which fixes the delivery order to the
//! commit order. Delivery itself happens on the single [`Publisher`]
//! worker after the lock is released, so a slow distributor never blocks
//! registry mutations.

use crate::{
    distributor::Distributor,
    error::{Error, Result},
    snapshot::Snapshot,
};
use futures::channel::oneshot;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Outcome of a submitted snapshot, resolved once the publisher delivered it
pub type Acknowledgement = oneshot::Receiver<Result<()>>;

struct PublishJob {
    snapshot: Arc<Snapshot>,
    ack: Option<oneshot::Sender<Result<()>>>,
}

/// Producer side of the publish queue
pub struct PublishGate {
    tx: async_channel::Sender<PublishJob>,
    needs_retry: Arc<AtomicBool>,
}

/// Single consumer that delivers queued snapshots in order
pub struct Publisher {
    rx: async_channel::Receiver<PublishJob>,
    distributor: Arc<dyn Distributor>,
    node_id: String,
    needs_retry: Arc<AtomicBool>,
}

/// Create a connected gate and publisher pair
pub fn channel(distributor: Arc<dyn Distributor>, node_id: impl Into<String>) -> (PublishGate, Publisher) {
    let (tx, rx) = async_channel::unbounded();
    let needs_retry = Arc::new(AtomicBool::new(false));

    let gate = PublishGate {
        tx,
        needs_retry: needs_retry.clone(),
    };
    let publisher = Publisher {
        rx,
        distributor,
        node_id: node_id.into(),
        needs_retry,
    };

    (gate, publisher)
}

impl PublishGate {
    /// Queue a snapshot and return a handle resolving to the delivery result
    pub fn submit(&self, snapshot: Arc<Snapshot>) -> Result<Acknowledgement> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.enqueue(PublishJob {
            snapshot,
            ack: Some(ack_tx),
        })?;
        Ok(ack_rx)
    }

    /// Queue a snapshot without waiting for delivery.
    ///
    /// A failed delivery is logged and leaves the retry flag set.
    pub fn submit_detached(&self, snapshot: Arc<Snapshot>) -> Result<()> {
        self.enqueue(PublishJob {
            snapshot,
            ack: None,
        })
    }

    /// Whether the most recent delivery failed
    pub fn needs_retry(&self) -> bool {
        self.needs_retry.load(Ordering::Acquire)
    }

    /// Stop accepting snapshots; already queued ones are still delivered
    pub fn close(&self) -> bool {
        self.tx.close()
    }

    /// Whether the queue was closed
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn enqueue(&self, job: PublishJob) -> Result<()> {
        let version = job.snapshot.version;
        self.tx.try_send(job).map_err(|_| {
            Error::PublishFailure(format!(
                "publish queue closed, snapshot version {} dropped",
                version
            ))
        })
    }
}

/// Wait for a submitted snapshot to be delivered
pub async fn acknowledged(ack: Acknowledgement) -> Result<()> {
    match ack.await {
        Ok(result) => result,
        Err(_) => Err(Error::PublishFailure(
            "publisher stopped before delivering the snapshot".to_string(),
        )),
    }
}

impl Publisher {
    /// Node identity snapshots are published under
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Deliver snapshots until the gate is closed and the queue is drained
    pub async fn run(self) {
        info!("Snapshot publisher started for node {}", self.node_id);

        while let Ok(job) = self.rx.recv().await {
            self.deliver(job).await;
        }

        info!("Snapshot publisher for node {} stopped", self.node_id);
    }

    async fn deliver(&self, job: PublishJob) {
        let version = job.snapshot.version;
        let result = self
            .distributor
            .publish(&self.node_id, job.snapshot)
            .await
            .map_err(|e| match e {
                Error::PublishFailure(msg) => Error::PublishFailure(msg),
                other => Error::PublishFailure(other.to_string()),
            });

        self.needs_retry.store(result.is_err(), Ordering::Release);

        match (job.ack, result) {
            (Some(ack), result) => {
                if let Err(e) = &result {
                    debug!("Snapshot version {} not delivered: {}", version, e);
                }
                let _ = ack.send(result);
            }
            (None, Ok(())) => {
                debug!("Snapshot version {} delivered", version);
            }
            (None, Err(e)) => {
                warn!(
                    "Snapshot version {} not delivered, retrying on next tick: {}",
                    version, e
                );
            }
        }
    }
}
