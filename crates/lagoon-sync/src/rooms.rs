use std::sync::{Arc, Mutex as StdMutex};

use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::protocol::rpc;
use crate::transport::HubTransport;

#[derive(Default)]
struct RoomState {
    active: Option<String>,
    ping_task: Option<JoinHandle<()>>,
    typing_on: bool,
    typing_idle: Option<JoinHandle<()>>,
    typing_hard: Option<JoinHandle<()>>,
}

struct RoomInner {
    transport: Arc<dyn HubTransport>,
    config: SyncConfig,
    state: StdMutex<RoomState>,
}

/// Chat-room membership on the same hub connection: one active room at a
/// time, an activity ping loop while inside, and a debounced typing
/// indicator.
#[derive(Clone)]
pub struct RoomSession {
    inner: Arc<RoomInner>,
}

impl RoomSession {
    pub fn new(transport: Arc<dyn HubTransport>, config: SyncConfig) -> Self {
        Self {
            inner: Arc::new(RoomInner {
                transport,
                config,
                state: StdMutex::new(RoomState::default()),
            }),
        }
    }

    pub fn active_room(&self) -> Option<String> {
        self.inner.state.lock().unwrap().active.clone()
    }

    /// Switch rooms: leave the previous one first, then join and start the
    /// activity ping loop.
    pub async fn join(&self, room_id: &str) -> Result<(), SyncError> {
        let previous = {
            let st = self.inner.state.lock().unwrap();
            match &st.active {
                Some(active) if active == room_id => return Ok(()),
                other => other.clone(),
            }
        };
        if let Some(previous) = previous {
            self.leave_room_inner(&previous).await;
        }

        self.inner
            .transport
            .invoke(rpc::JOIN_ROOM, json!(room_id))
            .await?;
        debug!(target: "lagoon::rooms", room_id, "joined room");

        let mut st = self.inner.state.lock().unwrap();
        st.active = Some(room_id.to_string());
        start_ping_loop(&self.inner, &mut st, room_id.to_string());
        Ok(())
    }

    pub async fn leave(&self) {
        let active = self.inner.state.lock().unwrap().active.clone();
        if let Some(room_id) = active {
            self.typing_off().await;
            self.leave_room_inner(&room_id).await;
        }
    }

    async fn leave_room_inner(&self, room_id: &str) {
        {
            let mut st = self.inner.state.lock().unwrap();
            if let Some(task) = st.ping_task.take() {
                task.abort();
            }
            if st.active.as_deref() == Some(room_id) {
                st.active = None;
            }
        }
        if !self.inner.transport.is_connected() {
            return;
        }
        // Presence first, then membership; both best effort.
        if let Err(err) = self
            .inner
            .transport
            .invoke(rpc::SET_INACTIVE_IN_ROOM, json!(room_id))
            .await
        {
            trace!(target: "lagoon::rooms", room_id, %err, "set-inactive failed");
        }
        if let Err(err) = self
            .inner
            .transport
            .invoke(rpc::LEAVE_ROOM, json!(room_id))
            .await
        {
            warn!(target: "lagoon::rooms", room_id, %err, "leave room failed");
        } else {
            debug!(target: "lagoon::rooms", room_id, "left room");
        }
    }

    /// Call on every keystroke. Sends `on` once, then schedules the idle
    /// stop and refreshes the hard stop.
    pub async fn typing_touch(&self) {
        let send_on = {
            let mut st = self.inner.state.lock().unwrap();
            if st.active.is_none() {
                return;
            }
            let first = !st.typing_on;
            st.typing_on = true;

            let idle_inner = self.inner.clone();
            let idle = tokio::spawn(async move {
                tokio::time::sleep(idle_inner.config.typing_idle).await;
                RoomInner::typing_stop(idle_inner).await;
            });
            if let Some(old) = st.typing_idle.replace(idle) {
                old.abort();
            }

            let hard_inner = self.inner.clone();
            let hard = tokio::spawn(async move {
                tokio::time::sleep(hard_inner.config.typing_hard).await;
                RoomInner::typing_stop(hard_inner).await;
            });
            if let Some(old) = st.typing_hard.replace(hard) {
                old.abort();
            }
            first
        };
        if send_on {
            self.send_typing("on").await;
        }
    }

    pub async fn typing_off(&self) {
        let was_on = {
            let mut st = self.inner.state.lock().unwrap();
            if let Some(task) = st.typing_idle.take() {
                task.abort();
            }
            if let Some(task) = st.typing_hard.take() {
                task.abort();
            }
            std::mem::replace(&mut st.typing_on, false)
        };
        if was_on {
            self.send_typing("off").await;
        }
    }

    async fn send_typing(&self, status: &str) {
        let room = self.inner.state.lock().unwrap().active.clone();
        let Some(room_id) = room else { return };
        let args = json!({"roomId": room_id, "status": status});
        if let Err(err) = self.inner.transport.invoke(rpc::TYPING, args).await {
            trace!(target: "lagoon::rooms", room_id, status, %err, "typing invoke failed");
        }
    }

    /// Re-join the active room after a reconnect; the server forgot us.
    pub(crate) async fn replay(&self) {
        let active = self.inner.state.lock().unwrap().active.clone();
        if let Some(room_id) = active {
            if let Err(err) = self
                .inner
                .transport
                .invoke(rpc::JOIN_ROOM, json!(room_id.as_str()))
                .await
            {
                warn!(target: "lagoon::rooms", room_id, %err, "room rejoin failed");
                return;
            }
            let mut st = self.inner.state.lock().unwrap();
            start_ping_loop(&self.inner, &mut st, room_id);
        }
    }

    pub(crate) fn shutdown(&self) {
        let mut st = self.inner.state.lock().unwrap();
        if let Some(task) = st.ping_task.take() {
            task.abort();
        }
        if let Some(task) = st.typing_idle.take() {
            task.abort();
        }
        if let Some(task) = st.typing_hard.take() {
            task.abort();
        }
        st.typing_on = false;
        st.active = None;
    }
}

impl RoomInner {
    async fn typing_stop(inner: Arc<Self>) {
        let (room, was_on) = {
            let mut st = inner.state.lock().unwrap();
            (st.active.clone(), std::mem::replace(&mut st.typing_on, false))
        };
        if !was_on {
            return;
        }
        let Some(room_id) = room else { return };
        let args = json!({"roomId": room_id, "status": "off"});
        if let Err(err) = inner.transport.invoke(rpc::TYPING, args).await {
            trace!(target: "lagoon::rooms", room_id, %err, "typing off failed");
        }
    }
}

fn start_ping_loop(inner: &Arc<RoomInner>, st: &mut RoomState, room_id: String) {
    let task_inner = inner.clone();
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(task_inner.config.room_ping_interval);
        loop {
            ticker.tick().await;
            if !task_inner.transport.is_connected() {
                continue;
            }
            let result = task_inner
                .transport
                .invoke(rpc::PING_ACTIVE_ROOM, json!(room_id.as_str()))
                .await;
            if let Err(err) = result {
                trace!(target: "lagoon::rooms", room_id, %err, "room ping failed");
            }
        }
    });
    if let Some(old) = st.ping_task.replace(task) {
        old.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockHub;
    use std::time::Duration;

    async fn session() -> (RoomSession, Arc<MockHub>) {
        let config = SyncConfig::default();
        let hub = MockHub::new();
        hub.connect(&config.connect_options()).await.unwrap();
        (RoomSession::new(hub.clone(), config), hub)
    }

    #[tokio::test(start_paused = true)]
    async fn switching_rooms_leaves_the_previous_one() {
        let (rooms, hub) = session().await;
        rooms.join("R1").await.unwrap();
        rooms.join("R2").await.unwrap();

        assert_eq!(rooms.active_room().as_deref(), Some("R2"));
        assert_eq!(hub.invoked(rpc::LEAVE_ROOM), vec![json!("R1")]);
        assert_eq!(hub.invoked(rpc::SET_INACTIVE_IN_ROOM), vec![json!("R1")]);
    }

    #[tokio::test(start_paused = true)]
    async fn join_same_room_twice_is_a_noop() {
        let (rooms, hub) = session().await;
        rooms.join("R1").await.unwrap();
        rooms.join("R1").await.unwrap();
        assert_eq!(hub.invoked(rpc::JOIN_ROOM).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ping_loop_runs_while_in_a_room() {
        let (rooms, hub) = session().await;
        rooms.join("R1").await.unwrap();
        tokio::time::sleep(Duration::from_secs(45)).await;
        // Interval ticks immediately, then every 20s.
        assert!(hub.invoked(rpc::PING_ACTIVE_ROOM).len() >= 3);

        rooms.leave().await;
        let pings = hub.invoked(rpc::PING_ACTIVE_ROOM).len();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(hub.invoked(rpc::PING_ACTIVE_ROOM).len(), pings);
    }

    #[tokio::test(start_paused = true)]
    async fn typing_debounces_to_one_on_and_one_off() {
        let (rooms, hub) = session().await;
        rooms.join("R1").await.unwrap();

        rooms.typing_touch().await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        rooms.typing_touch().await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        rooms.typing_touch().await;

        // Idle window (2s) elapses after the last keystroke.
        tokio::time::sleep(Duration::from_secs(3)).await;

        let typing = hub.invoked(rpc::TYPING);
        assert_eq!(typing.len(), 2);
        assert_eq!(typing[0]["status"], "on");
        assert_eq!(typing[1]["status"], "off");
    }
}
