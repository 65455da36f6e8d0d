use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::SyncError;
use crate::protocol::HubEvent;

pub mod mock;
pub mod websocket;

pub use mock::MockHub;
pub use websocket::WebSocketHub;

/// Everything the connection layer hears back from the wire.
#[derive(Debug, Clone)]
pub enum TransportSignal {
    Event(HubEvent),
    Reconnecting,
    Reconnected { connection_id: String },
    Closed { reason: Option<String> },
}

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub auth_token: String,
    pub device_id: String,
    pub keep_alive: Duration,
    /// Server-side inactivity window. When it lapses the transport reports
    /// `Closed`, never an error.
    pub server_timeout: Duration,
}

/// One persistent, multiplexed duplex connection to the hub.
///
/// The engine owns exactly one of these per session and talks to it through
/// the trait so tests can swap in [`MockHub`].
#[async_trait]
pub trait HubTransport: Send + Sync {
    /// Open the connection. Returns the server-assigned connection id.
    async fn connect(&self, options: &ConnectOptions) -> Result<String, SyncError>;

    /// Invoke a hub method and wait for its ack.
    async fn invoke(&self, method: &str, args: Value) -> Result<(), SyncError>;

    /// Await the next push event or lifecycle signal. Returns `None` once
    /// the transport is shut down for good.
    async fn next_signal(&self) -> Option<TransportSignal>;

    fn is_connected(&self) -> bool;

    async fn close(&self);
}
