//! WebSocket control plane server

use crate::{
    distributor::SnapshotCache,
    error::{Error, Result},
    models::*,
    registry::Registry,
    snapshot::Snapshot,
};
use async_net::{TcpListener, TcpStream};
use async_tungstenite::{WebSocketStream, accept_async};
use futures::StreamExt;
use futures::future::{self, BoxFuture, Either};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tungstenite::Message;

/// WebSocket server
pub struct WsServer {
    registry: Arc<Registry>,
    cache: Arc<SnapshotCache>,
    node_id: String,
    /// The TCP listener
    pub listener: TcpListener,
    // Closed to tell connection handlers to finish
    closing: async_channel::Sender<()>,
    closing_rx: async_channel::Receiver<()>,
    // Every handler holds a sender; the channel closes once all are gone
    live: async_channel::Sender<()>,
    live_rx: async_channel::Receiver<()>,
}

impl WsServer {
    /// Bind the control plane.
    ///
    /// `node_id` is the identity watched when a client does not name one.
    pub async fn new(
        addr: impl AsRef<str>,
        registry: Arc<Registry>,
        cache: Arc<SnapshotCache>,
        node_id: impl Into<String>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr.as_ref()).await?;
        info!("WebSocket server listening on {}", addr.as_ref());

        let (closing, closing_rx) = async_channel::bounded(1);
        let (live, live_rx) = async_channel::bounded(1);

        Ok(Self {
            registry,
            cache,
            node_id: node_id.into(),
            listener,
            closing,
            closing_rx,
            live,
            live_rx,
        })
    }

    /// Accept a new connection
    pub async fn accept(&self) -> Result<ConnectionHandler> {
        let (tcp_stream, addr) = self.listener.accept().await?;
        let ws = accept_async(tcp_stream).await?;

        debug!("New WebSocket connection from {}", addr);

        Ok(ConnectionHandler {
            ws,
            addr,
            registry: self.registry.clone(),
            cache: self.cache.clone(),
            node_id: self.node_id.clone(),
            watch: None,
            closing: self.closing_rx.clone(),
            _live: self.live.clone(),
        })
    }

    /// Get the registry reference
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Accept connections until `shutdown` is closed or yields, then drain.
    ///
    /// Each connection handler is passed to `spawn`. On shutdown no new
    /// connection is accepted, every handler finishes the request it is
    /// processing, answers it and closes its socket. Waits at most
    /// `drain_timeout` for that to happen; the registry is only safe to
    /// close once this returns.
    pub async fn serve<S>(
        self,
        shutdown: async_channel::Receiver<()>,
        spawn: S,
        drain_timeout: Duration,
    ) -> Result<()>
    where
        S: Fn(BoxFuture<'static, ()>),
    {
        loop {
            let next = {
                let accept = self.accept();
                let stopped = shutdown.recv();
                futures::pin_mut!(accept, stopped);
                match future::select(accept, stopped).await {
                    Either::Left((accepted, _)) => Some(accepted),
                    Either::Right(_) => None,
                }
            };

            match next {
                Some(Ok(handler)) => spawn(Box::pin(async move {
                    if let Err(e) = handler.handle().await {
                        error!("Connection handler error: {}", e);
                    }
                })),
                Some(Err(e)) => {
                    // Continue accepting other connections
                    error!("Failed to accept connection: {}", e);
                }
                None => break,
            }
        }

        self.drain(drain_timeout).await;
        Ok(())
    }

    async fn drain(self, timeout: Duration) {
        let Self {
            listener,
            closing,
            live,
            live_rx,
            ..
        } = self;
        drop(listener);

        // The server holds one sender of its own
        let pending = live.sender_count() - 1;
        info!("Control plane stopped accepting, draining {} connection(s)", pending);
        closing.close();
        drop(live);

        // Nothing is ever sent, so recv only returns once every handler is gone
        let drained = live_rx.recv();
        let deadline = async_io::Timer::after(timeout);
        futures::pin_mut!(drained);
        match future::select(drained, deadline).await {
            Either::Left(_) => info!("All connections drained"),
            Either::Right(_) => warn!(
                "{} connection(s) still open after {:?}, giving up",
                live_rx.sender_count(),
                timeout
            ),
        }
    }
}

/// WebSocket connection handler
pub struct ConnectionHandler {
    ws: WebSocketStream<TcpStream>,
    addr: SocketAddr,
    registry: Arc<Registry>,
    cache: Arc<SnapshotCache>,
    node_id: String,
    watch: Option<async_channel::Receiver<Arc<Snapshot>>>,
    closing: async_channel::Receiver<()>,
    _live: async_channel::Sender<()>,
}

enum Incoming {
    Message(Option<std::result::Result<Message, tungstenite::Error>>),
    Snapshot(Option<Arc<Snapshot>>),
    Closing,
}

#[derive(Deserialize)]
struct KeyParams {
    key: String,
}

#[derive(Deserialize, Default)]
struct NodeParams {
    #[serde(default)]
    node_id: Option<String>,
}

fn parse_params<T: DeserializeOwned>(params: serde_json::Value) -> Result<T> {
    serde_json::from_value(params).map_err(|e| Error::InvalidArgument(e.to_string()))
}

impl ConnectionHandler {
    /// Handle the connection
    pub async fn handle(mut self) -> Result<()> {
        info!("Handling connection from {}", self.addr);

        loop {
            // A request is always answered before shutdown is observed
            if self.closing.is_closed() {
                debug!("Server shutting down, closing {}", self.addr);
                let _ = self.ws.send(Message::Close(None)).await;
                break;
            }

            let incoming = {
                let message = self.ws.next();
                let pushed = Self::next_snapshot(self.watch.as_ref());
                let closing = self.closing.recv();
                futures::pin_mut!(pushed, closing);
                match future::select(message, future::select(pushed, closing)).await {
                    Either::Left((msg, _)) => Incoming::Message(msg),
                    Either::Right((Either::Left((snapshot, _)), _)) => Incoming::Snapshot(snapshot),
                    Either::Right((Either::Right(_), _)) => Incoming::Closing,
                }
            };

            match incoming {
                Incoming::Message(Some(Ok(Message::Text(text)))) => {
                    if let Err(e) = self.process_text_message(&text).await {
                        debug!("Rejected message from {}: {}", self.addr, e);
                        self.send_error_response("", &e).await?;
                    }
                }
                Incoming::Message(Some(Ok(Message::Close(_)))) | Incoming::Message(None) => {
                    debug!("Client {} closing connection", self.addr);
                    break;
                }
                Incoming::Message(Some(Ok(Message::Ping(data)))) => {
                    self.ws.send(Message::Pong(data)).await?;
                }
                Incoming::Message(Some(Ok(_))) => {
                    // Ignore other message types
                }
                Incoming::Message(Some(Err(e))) => {
                    error!("WebSocket error from {}: {}", self.addr, e);
                    break;
                }
                Incoming::Snapshot(Some(snapshot)) => {
                    let event = WsMessage::Event {
                        event: EventType::SnapshotPublished,
                        data: serde_json::to_value(snapshot.as_ref())?,
                    };
                    self.send_message(&event).await?;
                }
                Incoming::Snapshot(None) => {
                    self.watch = None;
                }
                Incoming::Closing => {
                    // Checked again at the top of the loop
                }
            }
        }

        info!("Connection from {} closed", self.addr);
        Ok(())
    }

    async fn next_snapshot(
        watch: Option<&async_channel::Receiver<Arc<Snapshot>>>,
    ) -> Option<Arc<Snapshot>> {
        match watch {
            Some(rx) => rx.recv().await.ok(),
            None => future::pending().await,
        }
    }

    /// Process a text message
    async fn process_text_message(&mut self, text: &str) -> Result<()> {
        let msg: WsMessage = serde_json::from_str(text)
            .map_err(|e| Error::InvalidArgument(format!("malformed message: {}", e)))?;

        match msg {
            WsMessage::Request { id, action, params } => {
                self.handle_request(&id, action, params).await?;
            }
            _ => {
                warn!("Unexpected message type from client {}", self.addr);
            }
        }

        Ok(())
    }

    /// Handle a request
    async fn handle_request(
        &mut self,
        id: &str,
        action: Action,
        params: serde_json::Value,
    ) -> Result<()> {
        debug!("Request {}: {:?}", id, action);

        let response = match action {
            Action::ListEndpoints => self.handle_list_endpoints().await,
            Action::GetEndpoint => self.handle_get_endpoint(params).await,
            Action::Register => self.handle_register(params).await,
            Action::Deregister => self.handle_deregister(params).await,
            Action::GetSnapshot => self.handle_get_snapshot(params).await,
            Action::WatchSnapshots => self.handle_watch_snapshots(params).await,
        };

        match response {
            Ok(data) => self.send_response(id, data).await?,
            Err(e) => self.send_error_response(id, &e).await?,
        }

        Ok(())
    }

    async fn handle_list_endpoints(&self) -> Result<serde_json::Value> {
        let endpoints = self.registry.list().await;
        Ok(serde_json::to_value(&endpoints)?)
    }

    async fn handle_get_endpoint(&self, params: serde_json::Value) -> Result<serde_json::Value> {
        let params: KeyParams = parse_params(params)?;
        let record = self.registry.get(&params.key).await?;
        Ok(serde_json::to_value(&record)?)
    }

    async fn handle_register(&self, params: serde_json::Value) -> Result<serde_json::Value> {
        let target: KeyedEndpoint = parse_params(params)?;
        self.registry
            .upsert(&target.key, target.address, target.port)
            .await?;
        Ok(serde_json::json!({ "result": "ok" }))
    }

    async fn handle_deregister(&self, params: serde_json::Value) -> Result<serde_json::Value> {
        let params: KeyParams = parse_params(params)?;
        self.registry.remove(&params.key).await?;
        Ok(serde_json::json!({ "result": "ok" }))
    }

    async fn handle_get_snapshot(&self, params: serde_json::Value) -> Result<serde_json::Value> {
        let node_id = self.node_id_param(params)?;
        let snapshot = self
            .cache
            .snapshot(&node_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("no snapshot for node {}", node_id)))?;
        Ok(serde_json::to_value(snapshot.as_ref())?)
    }

    async fn handle_watch_snapshots(&mut self, params: serde_json::Value) -> Result<serde_json::Value> {
        let node_id = self.node_id_param(params)?;
        self.watch = Some(self.cache.watch(&node_id).await);
        info!("Client {} watching snapshots for node {}", self.addr, node_id);
        Ok(serde_json::json!({ "node_id": node_id }))
    }

    fn node_id_param(&self, params: serde_json::Value) -> Result<String> {
        let params: NodeParams = if params.is_null() {
            NodeParams::default()
        } else {
            parse_params(params)?
        };
        Ok(params.node_id.unwrap_or_else(|| self.node_id.clone()))
    }

    /// Send a response
    async fn send_response(&mut self, id: &str, data: serde_json::Value) -> Result<()> {
        let msg = WsMessage::Response {
            id: id.to_string(),
            data: Some(data),
            error: None,
        };

        self.send_message(&msg).await
    }

    /// Send an error response
    async fn send_error_response(&mut self, id: &str, error: &Error) -> Result<()> {
        let msg = WsMessage::Response {
            id: id.to_string(),
            data: None,
            error: Some(error.to_info()),
        };

        self.send_message(&msg).await
    }

    /// Send a message
    async fn send_message(&mut self, msg: &WsMessage) -> Result<()> {
        let json = serde_json::to_string(msg)?;
        self.ws.send(Message::Text(json.into())).await?;
        Ok(())
    }
}
