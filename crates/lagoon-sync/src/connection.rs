use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use futures_util::future::BoxFuture;
use rand::Rng;
use serde_json::json;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::notify::{self, NotifySender, SyncNotification};
use crate::protocol::rpc;
use crate::registry::SubscriptionRegistry;
use crate::transport::HubTransport;

/// Extra work to re-issue after any reconnect, on top of the subscription
/// replay the supervisor performs itself (room membership, the user
/// notification channel).
pub type ReplayHook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

struct SupervisorInner {
    transport: Arc<dyn HubTransport>,
    registry: SubscriptionRegistry,
    config: SyncConfig,
    state: StdMutex<ConnectionState>,
    connection_id: StdMutex<Option<String>>,
    /// Serializes connect attempts so two callers never open two sockets.
    connect_gate: AsyncMutex<()>,
    stopping: AtomicBool,
    stop_signal: Notify,
    notify: NotifySender,
    replay_hook: StdMutex<Option<ReplayHook>>,
}

/// Owns the one persistent connection: idempotent connect, backoff
/// reconnect, subscription replay, graceful stop.
#[derive(Clone)]
pub struct ConnectionSupervisor {
    inner: Arc<SupervisorInner>,
}

impl ConnectionSupervisor {
    pub fn new(
        transport: Arc<dyn HubTransport>,
        registry: SubscriptionRegistry,
        config: SyncConfig,
        notify: NotifySender,
    ) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                transport,
                registry,
                config,
                state: StdMutex::new(ConnectionState::Disconnected),
                connection_id: StdMutex::new(None),
                connect_gate: AsyncMutex::new(()),
                stopping: AtomicBool::new(false),
                stop_signal: Notify::new(),
                notify,
                replay_hook: StdMutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock().unwrap()
    }

    pub fn set_replay_hook(&self, hook: ReplayHook) {
        *self.inner.replay_hook.lock().unwrap() = Some(hook);
    }

    async fn run_replay_hook(&self) {
        let hook = self.inner.replay_hook.lock().unwrap().clone();
        if let Some(hook) = hook {
            hook().await;
        }
    }

    pub fn connection_id(&self) -> Option<String> {
        self.inner.connection_id.lock().unwrap().clone()
    }

    fn set_state(&self, next: ConnectionState) {
        let changed = {
            let mut state = self.inner.state.lock().unwrap();
            let changed = *state != next;
            *state = next;
            changed
        };
        if changed {
            notify::emit(&self.inner.notify, SyncNotification::Connection(next));
        }
    }

    /// Idempotent: a second caller while an attempt is in flight awaits the
    /// same gate and finds the connection already up.
    pub async fn connect(&self) -> Result<(), SyncError> {
        let _gate = self.inner.connect_gate.lock().await;
        if self.inner.stopping.load(Ordering::SeqCst) {
            return Err(SyncError::Stopped);
        }
        match self.state() {
            ConnectionState::Connected => return Ok(()),
            // A reconnect loop is already working on it.
            ConnectionState::Reconnecting => return Ok(()),
            _ => {}
        }
        self.set_state(ConnectionState::Connecting);
        match self
            .inner
            .transport
            .connect(&self.inner.config.connect_options())
            .await
        {
            Ok(connection_id) => {
                info!(target: "lagoon::connection", %connection_id, "connected");
                *self.inner.connection_id.lock().unwrap() = Some(connection_id);
                self.set_state(ConnectionState::Connected);
                Ok(())
            }
            Err(err) => {
                self.set_state(ConnectionState::Disconnected);
                Err(err)
            }
        }
    }

    /// Network came back; try again if we gave up earlier.
    pub async fn on_network_online(&self) {
        self.retry_if_disconnected("network online").await;
    }

    /// App returned to the foreground.
    pub async fn on_app_foreground(&self) {
        self.retry_if_disconnected("app foreground").await;
    }

    async fn retry_if_disconnected(&self, cause: &str) {
        if self.state() != ConnectionState::Disconnected {
            return;
        }
        debug!(target: "lagoon::connection", cause, "proactive reconnect");
        if let Err(err) = self.connect().await {
            warn!(target: "lagoon::connection", cause, %err, "proactive reconnect failed");
        }
    }

    /// Transport announced its own reconnect cycle.
    pub(crate) fn handle_reconnecting(&self) {
        if !self.inner.stopping.load(Ordering::SeqCst) {
            self.set_state(ConnectionState::Reconnecting);
        }
    }

    /// Transport reconnected on its own: adopt the new connection and replay
    /// every subscription the server has forgotten.
    pub(crate) async fn handle_reconnected(&self, connection_id: String) {
        if self.inner.stopping.load(Ordering::SeqCst) {
            return;
        }
        info!(target: "lagoon::connection", %connection_id, "reconnected");
        *self.inner.connection_id.lock().unwrap() = Some(connection_id);
        self.set_state(ConnectionState::Connected);
        self.inner.registry.replay_joined().await;
        self.run_replay_hook().await;
    }

    /// Connection dropped: reconnect with exponential backoff. Gives up
    /// after the configured attempts; an online/foreground signal retries
    /// later.
    pub(crate) async fn handle_closed(&self, reason: Option<String>) {
        if self.inner.stopping.load(Ordering::SeqCst) {
            self.set_state(ConnectionState::Disconnected);
            return;
        }
        warn!(target: "lagoon::connection", reason = reason.as_deref().unwrap_or("unknown"), "connection closed");
        self.set_state(ConnectionState::Reconnecting);

        let mut delay = self.inner.config.reconnect_base;
        for attempt in 1..=self.inner.config.max_reconnect_attempts {
            let jitter =
                std::time::Duration::from_millis(rand::thread_rng().gen_range(0..250u64));
            tokio::select! {
                _ = tokio::time::sleep(delay + jitter) => {}
                _ = self.inner.stop_signal.notified() => {
                    self.set_state(ConnectionState::Disconnected);
                    return;
                }
            }
            if self.inner.stopping.load(Ordering::SeqCst) {
                self.set_state(ConnectionState::Disconnected);
                return;
            }
            if self.state() == ConnectionState::Connected {
                return;
            }
            match self.attempt().await {
                Ok(()) => {
                    info!(target: "lagoon::connection", attempt, "reconnected after backoff");
                    self.inner.registry.replay_joined().await;
                    self.run_replay_hook().await;
                    return;
                }
                Err(err) => {
                    warn!(target: "lagoon::connection", attempt, %err, "reconnect attempt failed");
                    delay = std::cmp::min(delay * 2, self.inner.config.reconnect_cap);
                }
            }
        }
        debug!(target: "lagoon::connection", "reconnect attempts exhausted");
        self.set_state(ConnectionState::Disconnected);
    }

    async fn attempt(&self) -> Result<(), SyncError> {
        let _gate = self.inner.connect_gate.lock().await;
        if self.inner.stopping.load(Ordering::SeqCst) {
            return Err(SyncError::Stopped);
        }
        let connection_id = self
            .inner
            .transport
            .connect(&self.inner.config.connect_options())
            .await?;
        *self.inner.connection_id.lock().unwrap() = Some(connection_id);
        self.set_state(ConnectionState::Connected);
        Ok(())
    }

    /// Best-effort leave of everything joined, then close, then clear local
    /// state no matter what the leaves did.
    pub async fn stop(&self) {
        self.inner.stopping.store(true, Ordering::SeqCst);
        self.inner.stop_signal.notify_waiters();

        let joined = self.inner.registry.begin_shutdown();
        if self.inner.transport.is_connected() && !joined.is_empty() {
            let leaves = joined.into_iter().map(|id| {
                let transport = self.inner.transport.clone();
                async move {
                    let result = transport
                        .invoke(rpc::LEAVE_RESOURCE_UPDATES, json!(id.as_str()))
                        .await;
                    (id, result)
                }
            });
            for (id, result) in futures_util::future::join_all(leaves).await {
                if let Err(err) = result {
                    warn!(target: "lagoon::connection", %id, %err, "leave on stop failed");
                }
            }
        }

        self.inner.transport.close().await;
        *self.inner.connection_id.lock().unwrap() = None;
        self.set_state(ConnectionState::Disconnected);
        debug!(target: "lagoon::connection", "stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResourceId;
    use crate::transport::MockHub;
    use tokio::sync::mpsc;

    fn supervisor(hub: Arc<MockHub>) -> (ConnectionSupervisor, SubscriptionRegistry) {
        let config = SyncConfig::default();
        let registry = SubscriptionRegistry::new(hub.clone(), config.clone());
        let (tx, _rx) = mpsc::unbounded_channel();
        (
            ConnectionSupervisor::new(hub, registry.clone(), config, tx),
            registry,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn connect_is_idempotent() {
        let hub = MockHub::new();
        let (supervisor, _) = supervisor(hub.clone());
        supervisor.connect().await.unwrap();
        supervisor.connect().await.unwrap();
        assert_eq!(hub.connect_count(), 1);
        assert_eq!(supervisor.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_connection_reconnects_and_replays() {
        let hub = MockHub::new();
        let (supervisor, registry) = supervisor(hub.clone());
        supervisor.connect().await.unwrap();
        let id = ResourceId::from("P1");
        registry.join(&id).await;

        hub.fail_next_connects(1);
        supervisor.handle_closed(Some("broken pipe".into())).await;

        assert_eq!(supervisor.state(), ConnectionState::Connected);
        // One initial connect plus the failed and the successful retries.
        assert_eq!(hub.connect_count(), 3);
        // The join was re-issued for the new connection.
        assert_eq!(
            hub.invoked(crate::protocol::rpc::JOIN_RESOURCE_UPDATES).len(),
            2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_gives_up_after_max_attempts() {
        let hub = MockHub::new();
        let (supervisor, _) = supervisor(hub.clone());
        supervisor.connect().await.unwrap();

        hub.fail_next_connects(u32::MAX);
        supervisor.handle_closed(None).await;
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);

        // A later network-online signal tries again.
        hub.fail_next_connects(0);
        supervisor.on_network_online().await;
        assert_eq!(supervisor.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_level_reconnect_replays_subscriptions() {
        let hub = MockHub::new();
        let (supervisor, registry) = supervisor(hub.clone());
        supervisor.connect().await.unwrap();
        registry.join(&ResourceId::from("P1")).await;
        registry.join(&ResourceId::from("P2")).await;

        supervisor.handle_reconnecting();
        assert_eq!(supervisor.state(), ConnectionState::Reconnecting);
        hub.finish_auto_reconnect("conn-2");
        supervisor.handle_reconnected("conn-2".into()).await;

        assert_eq!(supervisor.state(), ConnectionState::Connected);
        let joins = hub.invoked(crate::protocol::rpc::JOIN_RESOURCE_UPDATES);
        assert_eq!(joins.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_leaves_joined_resources_best_effort() {
        let hub = MockHub::new();
        let (supervisor, registry) = supervisor(hub.clone());
        supervisor.connect().await.unwrap();
        registry.join(&ResourceId::from("P1")).await;
        registry.join(&ResourceId::from("P2")).await;

        hub.fail_next(crate::protocol::rpc::LEAVE_RESOURCE_UPDATES, 1);
        supervisor.stop().await;

        // Both leaves attempted; one failed and was only logged.
        assert_eq!(
            hub.invoked(crate::protocol::rpc::LEAVE_RESOURCE_UPDATES).len(),
            2
        );
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
        assert_eq!(registry.joined_count(), 0);
        assert!(!hub.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn connect_after_stop_is_rejected() {
        let hub = MockHub::new();
        let (supervisor, _) = supervisor(hub.clone());
        supervisor.connect().await.unwrap();
        supervisor.stop().await;
        assert!(matches!(supervisor.connect().await, Err(SyncError::Stopped)));
    }
}
