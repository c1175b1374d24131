//! WebSocket client for the endpoint registry

use crate::{
    error::{Error, Result},
    models::*,
    snapshot::Snapshot,
};
use async_net::TcpStream;
use async_tungstenite::{WebSocketStream, client_async};
use futures::channel::{mpsc, oneshot};
use futures::lock::Mutex;
use futures::StreamExt;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info};
use tungstenite::Message;
use uuid::Uuid;

type PendingRequests = Arc<Mutex<HashMap<String, oneshot::Sender<Result<serde_json::Value>>>>>;

/// WebSocket client for the endpoint registry
pub struct WsClient {
    ws: WebSocketStream<TcpStream>,
    addr: SocketAddr,
}

impl WsClient {
    /// Connect to a registry control plane
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let url = format!("ws://{}", addr);
        let stream = TcpStream::connect(addr).await?;
        let (ws, _) = client_async(&url, stream).await?;

        info!("Connected to WebSocket server at {}", addr);

        Ok(Self { ws, addr })
    }

    /// Split into a request handle and the connection driver.
    ///
    /// The returned future must be run (e.g. spawned) for requests to
    /// complete.
    pub fn start_handler(self) -> (WsClientHandle, futures::future::BoxFuture<'static, Result<()>>) {
        let Self { mut ws, addr } = self;
        let pending: PendingRequests = Arc::new(Mutex::new(HashMap::new()));
        let (tx, mut rx) = mpsc::unbounded();
        let (events_tx, events_rx) = async_channel::unbounded();

        let handle = WsClientHandle {
            tx,
            pending: pending.clone(),
            events: events_rx,
        };

        let handler = async move {
            loop {
                futures::select! {
                    // Handle outgoing messages
                    msg = rx.next() => {
                        match msg {
                            Some(ClientMessage::Request(msg)) => {
                                let json = serde_json::to_string(&msg)?;
                                ws.send(Message::Text(json.into())).await?;
                            }
                            Some(ClientMessage::Close) => {
                                ws.send(Message::Close(None)).await?;
                                break;
                            }
                            None => break,
                        }
                    }

                    // Handle incoming messages
                    msg = ws.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                if let Err(e) = Self::handle_message(&text, &pending, &events_tx).await {
                                    error!("Error handling message: {}", e);
                                }
                            }
                            Some(Ok(Message::Close(_))) => {
                                info!("Server {} closed connection", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error: {}", e);
                                break;
                            }
                            None => break,
                            _ => {}
                        }
                    }
                }
            }

            // Fail whatever is still waiting
            pending.lock().await.clear();
            Ok::<(), Error>(())
        };

        (handle, Box::pin(handler))
    }

    async fn handle_message(
        text: &str,
        pending: &PendingRequests,
        events: &async_channel::Sender<(EventType, serde_json::Value)>,
    ) -> Result<()> {
        let msg: WsMessage = serde_json::from_str(text)?;

        match msg {
            WsMessage::Response { id, data, error } => {
                let mut pending = pending.lock().await;
                if let Some(tx) = pending.remove(&id) {
                    let result = match (error, data) {
                        (Some(error), _) => Err(Error::from_info(error)),
                        (None, Some(data)) => Ok(data),
                        (None, None) => Err(Error::Connection("empty response".to_string())),
                    };
                    let _ = tx.send(result);
                } else if let Some(error) = error {
                    debug!("Uncorrelated error from server: {}", error.message);
                }
            }
            WsMessage::Event { event, data } => {
                let _ = events.try_send((event, data));
            }
            WsMessage::Request { .. } => {
                debug!("Unexpected request from server");
            }
        }

        Ok(())
    }
}

enum ClientMessage {
    Request(WsMessage),
    Close,
}

/// Handle for interacting with the WebSocket client
#[derive(Clone)]
pub struct WsClientHandle {
    tx: mpsc::UnboundedSender<ClientMessage>,
    pending: PendingRequests,
    events: async_channel::Receiver<(EventType, serde_json::Value)>,
}

impl WsClientHandle {
    /// Send a request and wait for response
    async fn request(&self, action: Action, params: serde_json::Value) -> Result<serde_json::Value> {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();

        self.pending.lock().await.insert(id.clone(), tx);

        let msg = WsMessage::Request {
            id: id.clone(),
            action,
            params,
        };

        self.tx
            .unbounded_send(ClientMessage::Request(msg))
            .map_err(|_| Error::Connection("failed to send request".to_string()))?;

        match rx.await {
            Ok(result) => result,
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(Error::Connection("request cancelled".to_string()))
            }
        }
    }

    /// List all endpoints
    pub async fn list(&self) -> Result<Vec<EndpointRecord>> {
        let data = self.request(Action::ListEndpoints, serde_json::json!({})).await?;
        Ok(serde_json::from_value(data)?)
    }

    /// Get the endpoint registered under `key`
    pub async fn get(&self, key: &str) -> Result<EndpointRecord> {
        let data = self
            .request(Action::GetEndpoint, serde_json::json!({ "key": key }))
            .await?;
        Ok(serde_json::from_value(data)?)
    }

    /// Register or refresh an endpoint
    pub async fn register(&self, key: &str, address: &str, port: u16) -> Result<()> {
        let target = KeyedEndpoint {
            key: key.to_string(),
            address: address.to_string(),
            port,
        };
        self.request(Action::Register, serde_json::to_value(&target)?)
            .await?;
        Ok(())
    }

    /// Remove an endpoint
    pub async fn deregister(&self, key: &str) -> Result<()> {
        self.request(Action::Deregister, serde_json::json!({ "key": key }))
            .await?;
        Ok(())
    }

    /// Latest snapshot of a node, or of the server's own node when `None`
    pub async fn snapshot(&self, node_id: Option<&str>) -> Result<Snapshot> {
        let data = self
            .request(Action::GetSnapshot, serde_json::json!({ "node_id": node_id }))
            .await?;
        Ok(serde_json::from_value(data)?)
    }

    /// Start streaming snapshots; they arrive through [`WsClientHandle::events`]
    pub async fn watch_snapshots(&self, node_id: Option<&str>) -> Result<()> {
        self.request(Action::WatchSnapshots, serde_json::json!({ "node_id": node_id }))
            .await?;
        Ok(())
    }

    /// Server-pushed events
    pub fn events(&self) -> &async_channel::Receiver<(EventType, serde_json::Value)> {
        &self.events
    }

    /// Wait for the next published snapshot
    pub async fn next_snapshot(&self) -> Result<Snapshot> {
        loop {
            let (event, data) = self
                .events
                .recv()
                .await
                .map_err(|_| Error::Connection("connection closed".to_string()))?;
            if event == EventType::SnapshotPublished {
                return Ok(serde_json::from_value(data)?);
            }
        }
    }

    /// Close the connection
    pub async fn close(&self) -> Result<()> {
        self.tx
            .unbounded_send(ClientMessage::Close)
            .map_err(|_| Error::Connection("failed to send close".to_string()))?;
        Ok(())
    }
}
