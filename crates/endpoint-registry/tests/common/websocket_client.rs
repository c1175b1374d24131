//! WebSocket test client wrapper

use anyhow::Result;
use endpoint_registry::{EndpointRecord, Snapshot, WsClient, WsClientHandle};
use std::net::SocketAddr;

/// WebSocket test client wrapper
pub struct WebSocketTestClient {
    pub handle: WsClientHandle,
    _handler_task: smol::Task<endpoint_registry::Result<()>>,
}

impl WebSocketTestClient {
    /// Connect to WebSocket server
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let client = WsClient::connect(addr).await?;
        let (handle, handler) = client.start_handler();

        // Run handler in background
        let handler_task = smol::spawn(handler);

        Ok(Self {
            handle,
            _handler_task: handler_task,
        })
    }

    /// List endpoints
    pub async fn list(&self) -> Result<Vec<EndpointRecord>> {
        Ok(self.handle.list().await?)
    }

    /// Register an endpoint
    pub async fn register(&self, key: &str, address: &str, port: u16) -> endpoint_registry::Result<()> {
        self.handle.register(key, address, port).await
    }

    /// Deregister an endpoint
    pub async fn deregister(&self, key: &str) -> endpoint_registry::Result<()> {
        self.handle.deregister(key).await
    }

    /// Wait for the next pushed snapshot
    pub async fn next_snapshot(&self) -> Result<Snapshot> {
        Ok(self.handle.next_snapshot().await?)
    }

    /// Close the connection
    pub async fn close(self) -> Result<()> {
        self.handle.close().await?;
        Ok(())
    }
}
