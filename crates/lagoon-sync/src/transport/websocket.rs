use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, trace, warn};
use url::Url;

use super::{ConnectOptions, HubTransport, TransportSignal};
use crate::error::SyncError;
use crate::protocol::HubEvent;

/// Production hub transport: JSON text frames over a single WebSocket.
///
/// Outbound invocations are `{"type":"invoke","id":..,"target":..,
/// "arguments":[..]}` and are acked by `{"type":"ack","id":..}`; server
/// pushes arrive as `{"type":"event","target":..,"arguments":[..]}`.
pub struct WebSocketHub {
    base_url: String,
    signal_tx: mpsc::UnboundedSender<TransportSignal>,
    signal_rx: AsyncMutex<mpsc::UnboundedReceiver<TransportSignal>>,
    connected: Arc<AtomicBool>,
    pending: Arc<StdMutex<HashMap<String, oneshot::Sender<Result<(), String>>>>>,
    active: StdMutex<Option<ActiveConn>>,
    invoke_timeout: StdMutex<Duration>,
}

struct ActiveConn {
    out_tx: mpsc::UnboundedSender<Message>,
    tasks: Vec<JoinHandle<()>>,
    closed: Arc<AtomicBool>,
}

enum InboundFrame {
    Event(HubEvent),
    Ack { id: String, error: Option<String> },
    KeepAlive,
}

impl WebSocketHub {
    pub fn new(base_url: impl Into<String>) -> Self {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        Self {
            base_url: base_url.into(),
            signal_tx,
            signal_rx: AsyncMutex::new(signal_rx),
            connected: Arc::new(AtomicBool::new(false)),
            pending: Arc::new(StdMutex::new(HashMap::new())),
            active: StdMutex::new(None),
            invoke_timeout: StdMutex::new(Duration::from_secs(30)),
        }
    }

    fn build_url(&self, options: &ConnectOptions) -> Result<Url, SyncError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|_| SyncError::InvalidUrl(self.base_url.clone()))?;
        url.query_pairs_mut()
            .append_pair("deviceId", &options.device_id);
        if !options.auth_token.is_empty() {
            url.query_pairs_mut()
                .append_pair("access_token", &options.auth_token);
        }
        Ok(url)
    }

    fn teardown(&self) {
        if let Some(conn) = self.active.lock().unwrap().take() {
            conn.closed.store(true, Ordering::SeqCst);
            for task in conn.tasks {
                task.abort();
            }
        }
        self.connected.store(false, Ordering::SeqCst);
        fail_pending(&self.pending, "connection closed");
    }
}

fn fail_pending(
    pending: &StdMutex<HashMap<String, oneshot::Sender<Result<(), String>>>>,
    reason: &str,
) {
    let drained: Vec<_> = pending.lock().unwrap().drain().collect();
    for (_, tx) in drained {
        let _ = tx.send(Err(reason.to_string()));
    }
}

fn parse_frame(text: &str) -> Option<InboundFrame> {
    let value: Value = serde_json::from_str(text).ok()?;
    match value.get("type").and_then(Value::as_str)? {
        "event" => {
            let target = value.get("target").and_then(Value::as_str)?.to_string();
            let payload = value
                .get("arguments")
                .and_then(Value::as_array)
                .and_then(|args| args.first().cloned())
                .unwrap_or(Value::Null);
            Some(InboundFrame::Event(HubEvent::new(target, payload)))
        }
        "ack" => {
            let id = value.get("id").and_then(Value::as_str)?.to_string();
            let error = value
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string);
            Some(InboundFrame::Ack { id, error })
        }
        "ping" | "pong" => Some(InboundFrame::KeepAlive),
        _ => None,
    }
}

#[async_trait]
impl HubTransport for WebSocketHub {
    async fn connect(&self, options: &ConnectOptions) -> Result<String, SyncError> {
        // A second connect replaces whatever was there before.
        self.teardown();
        *self.invoke_timeout.lock().unwrap() = options.server_timeout;

        let url = self.build_url(options)?;
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|err| SyncError::Transport(err.to_string()))?;
        let (mut sink, mut source) = stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let closed = Arc::new(AtomicBool::new(false));
        let last_seen = Arc::new(StdMutex::new(Instant::now()));

        let writer = tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                if sink.send(message).await.is_err() {
                    break;
                }
            }
        });

        let reader = {
            let signal_tx = self.signal_tx.clone();
            let connected = self.connected.clone();
            let pending = self.pending.clone();
            let closed = closed.clone();
            let last_seen = last_seen.clone();
            tokio::spawn(async move {
                let mut reason = None;
                while let Some(message) = source.next().await {
                    *last_seen.lock().unwrap() = Instant::now();
                    match message {
                        Ok(Message::Text(text)) => match parse_frame(&text) {
                            Some(InboundFrame::Event(event)) => {
                                trace!(target: "lagoon::transport", name = %event.name, "event frame");
                                let _ = signal_tx.send(TransportSignal::Event(event));
                            }
                            Some(InboundFrame::Ack { id, error }) => {
                                let waiter = pending.lock().unwrap().remove(&id);
                                if let Some(tx) = waiter {
                                    let _ = tx.send(match error {
                                        Some(err) => Err(err),
                                        None => Ok(()),
                                    });
                                }
                            }
                            Some(InboundFrame::KeepAlive) => {}
                            None => {
                                trace!(target: "lagoon::transport", "unrecognized frame dropped");
                            }
                        },
                        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                        Ok(Message::Close(frame)) => {
                            reason = frame.map(|f| f.reason.to_string());
                            break;
                        }
                        Ok(_) => {}
                        Err(err) => {
                            reason = Some(err.to_string());
                            break;
                        }
                    }
                }
                connected.store(false, Ordering::SeqCst);
                fail_pending(&pending, "connection closed");
                if !closed.swap(true, Ordering::SeqCst) {
                    let _ = signal_tx.send(TransportSignal::Closed { reason });
                }
            })
        };

        let keepalive = {
            let out_tx = out_tx.clone();
            let signal_tx = self.signal_tx.clone();
            let connected = self.connected.clone();
            let closed = closed.clone();
            let interval = options.keep_alive;
            let server_timeout = options.server_timeout;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if closed.load(Ordering::SeqCst) {
                        break;
                    }
                    let idle = last_seen.lock().unwrap().elapsed();
                    if idle > server_timeout {
                        // Server went quiet past its own timeout: that is a
                        // disconnect, not an error.
                        debug!(target: "lagoon::transport", ?idle, "server inactivity timeout");
                        connected.store(false, Ordering::SeqCst);
                        if !closed.swap(true, Ordering::SeqCst) {
                            let _ = signal_tx.send(TransportSignal::Closed {
                                reason: Some("server inactivity timeout".into()),
                            });
                        }
                        break;
                    }
                    let ping = json!({"type": "ping"}).to_string();
                    if out_tx.send(Message::Text(ping)).is_err() {
                        break;
                    }
                }
            })
        };

        let connection_id = uuid::Uuid::new_v4().to_string();
        *self.active.lock().unwrap() = Some(ActiveConn {
            out_tx,
            tasks: vec![writer, reader, keepalive],
            closed,
        });
        self.connected.store(true, Ordering::SeqCst);
        debug!(target: "lagoon::transport", %connection_id, "websocket connected");
        Ok(connection_id)
    }

    async fn invoke(&self, method: &str, args: Value) -> Result<(), SyncError> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id.clone(), tx);

        let frame = json!({
            "type": "invoke",
            "id": id,
            "target": method,
            "arguments": [args],
        })
        .to_string();

        let sent = {
            let active = self.active.lock().unwrap();
            match active.as_ref() {
                Some(conn) => conn.out_tx.send(Message::Text(frame)).is_ok(),
                None => false,
            }
        };
        if !sent {
            self.pending.lock().unwrap().remove(&id);
            return Err(SyncError::NotConnected);
        }

        let timeout = *self.invoke_timeout.lock().unwrap();
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(reason))) => Err(SyncError::rpc(method, reason)),
            Ok(Err(_)) => Err(SyncError::Transport("connection lost".into())),
            Err(_) => {
                self.pending.lock().unwrap().remove(&id);
                warn!(target: "lagoon::transport", method, "invoke timed out");
                Err(SyncError::rpc(method, "ack timed out"))
            }
        }
    }

    async fn next_signal(&self) -> Option<TransportSignal> {
        self.signal_rx.lock().await.recv().await
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        let out_tx = self
            .active
            .lock()
            .unwrap()
            .as_ref()
            .map(|conn| conn.out_tx.clone());
        if let Some(out_tx) = out_tx {
            let _ = out_tx.send(Message::Close(None));
        }
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_event_frames() {
        let frame = r#"{"type":"event","target":"PostLiked","arguments":[{"postCode":"P1"}]}"#;
        match parse_frame(frame) {
            Some(InboundFrame::Event(event)) => {
                assert_eq!(event.name, "PostLiked");
                assert_eq!(event.payload["postCode"], "P1");
            }
            _ => panic!("expected event frame"),
        }
    }

    #[test]
    fn parses_ack_frames_with_and_without_error() {
        match parse_frame(r#"{"type":"ack","id":"42"}"#) {
            Some(InboundFrame::Ack { id, error }) => {
                assert_eq!(id, "42");
                assert!(error.is_none());
            }
            _ => panic!("expected ack frame"),
        }
        match parse_frame(r#"{"type":"ack","id":"42","error":"denied"}"#) {
            Some(InboundFrame::Ack { error, .. }) => assert_eq!(error.as_deref(), Some("denied")),
            _ => panic!("expected ack frame"),
        }
    }

    #[test]
    fn garbage_frames_are_dropped() {
        assert!(parse_frame("not json").is_none());
        assert!(parse_frame(r#"{"kind":"event"}"#).is_none());
        assert!(parse_frame(r#"{"type":"mystery"}"#).is_none());
    }
}
