use std::sync::{Arc, Mutex as StdMutex};

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{CacheSet, MultiCacheWriter};
use crate::config::SyncConfig;
use crate::connection::{ConnectionState, ConnectionSupervisor};
use crate::dispatch::EventDispatcher;
use crate::error::SyncError;
use crate::fetch::ResourceFetcher;
use crate::model::ResourceId;
use crate::notify::SyncNotification;
use crate::optimistic::OptimisticMutations;
use crate::protocol::rpc;
use crate::refresh::RefreshScheduler;
use crate::registry::SubscriptionRegistry;
use crate::rooms::RoomSession;
use crate::transport::{HubTransport, TransportSignal};

/// One lifecycle-scoped synchronization session: constructed at (or after)
/// login, stopped at logout. Owns the connection, the subscription
/// registry, the caches and every timer; nothing here is process-global.
pub struct SyncEngine {
    transport: Arc<dyn HubTransport>,
    caches: CacheSet,
    writer: Arc<MultiCacheWriter>,
    registry: SubscriptionRegistry,
    supervisor: ConnectionSupervisor,
    scheduler: RefreshScheduler,
    optimistic: OptimisticMutations,
    rooms: RoomSession,
    notifications: StdMutex<Option<mpsc::UnboundedReceiver<SyncNotification>>>,
    pump: StdMutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    /// Wire the whole engine together and start pumping transport signals.
    /// Must run inside a tokio runtime.
    pub fn new(
        config: SyncConfig,
        transport: Arc<dyn HubTransport>,
        fetcher: Arc<dyn ResourceFetcher>,
    ) -> Arc<Self> {
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();

        let caches = CacheSet::new();
        let writer = caches.writer();
        let registry = SubscriptionRegistry::new(transport.clone(), config.clone());
        let supervisor = ConnectionSupervisor::new(
            transport.clone(),
            registry.clone(),
            config.clone(),
            notify_tx.clone(),
        );
        let scheduler = RefreshScheduler::new(fetcher.clone(), writer.clone());
        let optimistic = OptimisticMutations::new(
            writer.clone(),
            fetcher,
            notify_tx.clone(),
            config.overlay_ttl,
        );
        let rooms = RoomSession::new(transport.clone(), config.clone());
        let dispatcher = EventDispatcher::new(
            writer.clone(),
            registry.clone(),
            scheduler.clone(),
            optimistic.clone(),
            notify_tx,
            config.clone(),
        );

        // Everything the server forgot across a reconnect gets re-issued:
        // resource joins (the supervisor does those), the active room and
        // the user notification channel.
        supervisor.set_replay_hook({
            let rooms = rooms.clone();
            let transport = transport.clone();
            Arc::new(move || {
                let rooms = rooms.clone();
                let transport = transport.clone();
                let replay: BoxFuture<'static, ()> = Box::pin(async move {
                    rooms.replay().await;
                    if let Err(err) = transport.invoke(rpc::JOIN_USER_NOTIFY, Value::Null).await {
                        warn!(target: "lagoon::engine", %err, "user notify rejoin failed");
                    }
                });
                replay
            })
        });

        let engine = Arc::new(Self {
            transport: transport.clone(),
            caches,
            writer,
            registry,
            supervisor: supervisor.clone(),
            scheduler,
            optimistic,
            rooms: rooms.clone(),
            notifications: StdMutex::new(Some(notify_rx)),
            pump: StdMutex::new(None),
        });

        let pump = tokio::spawn(async move {
            while let Some(signal) = transport.next_signal().await {
                match signal {
                    TransportSignal::Event(event) => dispatcher.dispatch(event).await,
                    TransportSignal::Reconnecting => supervisor.handle_reconnecting(),
                    TransportSignal::Reconnected { connection_id } => {
                        supervisor.handle_reconnected(connection_id).await;
                    }
                    TransportSignal::Closed { reason } => {
                        supervisor.handle_closed(reason).await;
                    }
                }
            }
            debug!(target: "lagoon::engine", "signal pump ended");
        });
        *engine.pump.lock().unwrap() = Some(pump);
        engine
    }

    /// Open the hub connection and join the user notification channel.
    pub async fn connect(&self) -> Result<(), SyncError> {
        self.supervisor.connect().await?;
        if let Err(err) = self
            .transport
            .invoke(rpc::JOIN_USER_NOTIFY, Value::Null)
            .await
        {
            warn!(target: "lagoon::engine", %err, "user notify join failed");
        }
        Ok(())
    }

    /// Visibility intake from the scroll container.
    pub fn set_visibility(&self, id: &ResourceId, visible: bool) {
        self.registry.set_visibility(id, visible);
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    pub async fn on_network_online(&self) {
        self.supervisor.on_network_online().await;
    }

    pub async fn on_app_foreground(&self) {
        self.supervisor.on_app_foreground().await;
    }

    pub fn caches(&self) -> &CacheSet {
        &self.caches
    }

    pub fn writer(&self) -> &Arc<MultiCacheWriter> {
        &self.writer
    }

    pub fn optimistic(&self) -> &OptimisticMutations {
        &self.optimistic
    }

    pub fn rooms(&self) -> &RoomSession {
        &self.rooms
    }

    pub fn joined_resources(&self) -> Vec<ResourceId> {
        self.registry.joined_snapshot()
    }

    pub fn is_subscribed(&self, id: &ResourceId) -> bool {
        self.registry.is_subscribed(id)
    }

    pub fn has_pending_refresh(&self, id: &ResourceId) -> bool {
        self.scheduler.has_pending(id)
    }

    pub fn has_pending_subscription_timer(&self, id: &ResourceId) -> bool {
        self.registry.has_pending_timer(id)
    }

    /// Take the notification stream. Yields `None` on a second call.
    pub fn notifications(&self) -> Option<mpsc::UnboundedReceiver<SyncNotification>> {
        self.notifications.lock().unwrap().take()
    }

    /// Tear the session down: cancel every pending timer, best-effort
    /// leave everything joined, close the connection. Idempotent.
    pub async fn stop(&self) {
        info!(target: "lagoon::engine", "stopping sync engine");
        self.rooms.shutdown();
        self.scheduler.shutdown();
        self.optimistic.clear();
        self.supervisor.stop().await;
        if let Some(pump) = self.pump.lock().unwrap().take() {
            pump.abort();
        }
    }
}
