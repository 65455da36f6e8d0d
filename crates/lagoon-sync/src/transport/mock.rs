use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, mpsc};

use super::{ConnectOptions, HubTransport, TransportSignal};
use crate::error::SyncError;
use crate::protocol::HubEvent;

/// In-memory hub used by tests: records every invocation, lets the test
/// script failures and push events/lifecycle signals.
pub struct MockHub {
    connected: AtomicBool,
    connect_count: StdMutex<u32>,
    fail_connects: StdMutex<u32>,
    fail_methods: StdMutex<HashMap<String, u32>>,
    invocations: StdMutex<Vec<(String, Value)>>,
    signal_tx: mpsc::UnboundedSender<TransportSignal>,
    signal_rx: AsyncMutex<mpsc::UnboundedReceiver<TransportSignal>>,
}

impl MockHub {
    pub fn new() -> Arc<Self> {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            connected: AtomicBool::new(false),
            connect_count: StdMutex::new(0),
            fail_connects: StdMutex::new(0),
            fail_methods: StdMutex::new(HashMap::new()),
            invocations: StdMutex::new(Vec::new()),
            signal_tx,
            signal_rx: AsyncMutex::new(signal_rx),
        })
    }

    /// Deliver a server push event.
    pub fn push_event(&self, name: &str, payload: Value) {
        let _ = self
            .signal_tx
            .send(TransportSignal::Event(HubEvent::new(name, payload)));
    }

    /// Simulate the transport dropping; the engine sees `Closed`.
    pub fn drop_connection(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.signal_tx.send(TransportSignal::Closed {
            reason: Some(reason.to_string()),
        });
    }

    /// Simulate a transport-level automatic reconnect cycle.
    pub fn begin_auto_reconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.signal_tx.send(TransportSignal::Reconnecting);
    }

    pub fn finish_auto_reconnect(&self, connection_id: &str) {
        self.connected.store(true, Ordering::SeqCst);
        let _ = self.signal_tx.send(TransportSignal::Reconnected {
            connection_id: connection_id.to_string(),
        });
    }

    /// Make the next `n` connect attempts fail.
    pub fn fail_next_connects(&self, n: u32) {
        *self.fail_connects.lock().unwrap() = n;
    }

    /// Make the next `n` invocations of `method` fail.
    pub fn fail_next(&self, method: &str, n: u32) {
        self.fail_methods
            .lock()
            .unwrap()
            .insert(method.to_string(), n);
    }

    pub fn connect_count(&self) -> u32 {
        *self.connect_count.lock().unwrap()
    }

    pub fn invocations(&self) -> Vec<(String, Value)> {
        self.invocations.lock().unwrap().clone()
    }

    /// Arguments of every recorded invocation of `method`.
    pub fn invoked(&self, method: &str) -> Vec<Value> {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, args)| args.clone())
            .collect()
    }
}

#[async_trait]
impl HubTransport for MockHub {
    async fn connect(&self, _options: &ConnectOptions) -> Result<String, SyncError> {
        *self.connect_count.lock().unwrap() += 1;
        {
            let mut failures = self.fail_connects.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(SyncError::Transport("scripted connect failure".into()));
            }
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(format!("mock-{}", self.connect_count()))
    }

    async fn invoke(&self, method: &str, args: Value) -> Result<(), SyncError> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        self.invocations
            .lock()
            .unwrap()
            .push((method.to_string(), args));
        let mut failures = self.fail_methods.lock().unwrap();
        if let Some(count) = failures.get_mut(method) {
            if *count > 0 {
                *count -= 1;
                return Err(SyncError::rpc(method, "scripted failure"));
            }
        }
        Ok(())
    }

    async fn next_signal(&self) -> Option<TransportSignal> {
        self.signal_rx.lock().await.recv().await
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}
