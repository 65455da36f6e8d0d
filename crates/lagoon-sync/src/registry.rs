use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::SyncConfig;
use crate::model::ResourceId;
use crate::protocol::rpc;
use crate::transport::HubTransport;

/// Per-resource subscription lifecycle. `PendingJoin`/`PendingLeave` cover
/// both the settle window and the RPC in flight; a settle timer handle in
/// the timer map tells the two apart.
#[derive(Debug, Clone, Copy, PartialEq)]
enum SubState {
    PendingJoin,
    Joined { seq: u64 },
    PendingLeave,
}

#[derive(Default)]
struct RegistryState {
    subs: HashMap<ResourceId, SubState>,
    /// Resources currently visible, i.e. wanted. Mutated only by
    /// visibility/join/leave entry points under the state lock.
    desired: HashSet<ResourceId>,
    /// At most one settle timer per resource; scheduling replaces and
    /// aborts any previous one.
    timers: HashMap<ResourceId, JoinHandle<()>>,
    next_seq: u64,
    shutdown: bool,
}

impl RegistryState {
    fn joined_count(&self) -> usize {
        self.subs
            .values()
            .filter(|s| matches!(s, SubState::Joined { .. }))
            .count()
    }

    fn oldest_joined(&self) -> Option<ResourceId> {
        self.subs
            .iter()
            .filter_map(|(id, state)| match state {
                SubState::Joined { seq } => Some((*seq, id.clone())),
                _ => None,
            })
            .min_by_key(|(seq, _)| *seq)
            .map(|(_, id)| id)
    }
}

struct RegistryInner {
    transport: Arc<dyn HubTransport>,
    config: SyncConfig,
    state: StdMutex<RegistryState>,
}

/// Tracks which resources are joined on the hub and owns every settle
/// timer. Other components request changes through the public operations
/// and never touch the maps directly.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    inner: Arc<RegistryInner>,
}

enum Settle {
    Join,
    Leave,
}

impl SubscriptionRegistry {
    pub fn new(transport: Arc<dyn HubTransport>, config: SyncConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                transport,
                config,
                state: StdMutex::new(RegistryState::default()),
            }),
        }
    }

    /// Visibility intake. Joins settle for `join_settle`, leaves for the
    /// shorter `leave_settle`; a flip back within the window cancels the
    /// pending transition without any RPC.
    pub fn set_visibility(&self, id: &ResourceId, visible: bool) {
        let inner = &self.inner;
        let mut st = inner.state.lock().unwrap();
        if st.shutdown {
            return;
        }
        if visible {
            st.desired.insert(id.clone());
            match st.subs.get(id).copied() {
                None => {
                    st.subs.insert(id.clone(), SubState::PendingJoin);
                    schedule_settle(inner, &mut st, id.clone(), Settle::Join);
                }
                Some(SubState::PendingJoin) | Some(SubState::Joined { .. }) => {}
                Some(SubState::PendingLeave) => {
                    if let Some(timer) = st.timers.remove(id) {
                        // Still inside the leave window: the resource never
                        // actually left.
                        timer.abort();
                        let seq = st.next_seq;
                        st.next_seq += 1;
                        st.subs.insert(id.clone(), SubState::Joined { seq });
                        trace!(target: "lagoon::registry", %id, "leave canceled inside settle window");
                    }
                    // Otherwise the leave RPC is in flight; its completion
                    // sees the id desired again and rejoins.
                }
            }
        } else {
            st.desired.remove(id);
            match st.subs.get(id).copied() {
                None => {}
                Some(SubState::PendingJoin) => {
                    if let Some(timer) = st.timers.remove(id) {
                        timer.abort();
                        st.subs.remove(id);
                        trace!(target: "lagoon::registry", %id, "join canceled inside settle window");
                    }
                    // Join RPC in flight: its ack sees the id undesired and
                    // issues a compensating leave.
                }
                Some(SubState::Joined { .. }) => {
                    st.subs.insert(id.clone(), SubState::PendingLeave);
                    schedule_settle(inner, &mut st, id.clone(), Settle::Leave);
                }
                Some(SubState::PendingLeave) => {}
            }
        }
    }

    /// Join immediately, skipping the settle window. No-op when already
    /// joined or joining.
    pub async fn join(&self, id: &ResourceId) {
        {
            let mut st = self.inner.state.lock().unwrap();
            if st.shutdown {
                return;
            }
            st.desired.insert(id.clone());
            match st.subs.get(id).copied() {
                Some(SubState::PendingJoin) | Some(SubState::Joined { .. }) => return,
                Some(SubState::PendingLeave) => {
                    if let Some(timer) = st.timers.remove(id) {
                        timer.abort();
                        let seq = st.next_seq;
                        st.next_seq += 1;
                        st.subs.insert(id.clone(), SubState::Joined { seq });
                    }
                    return;
                }
                None => {
                    st.subs.insert(id.clone(), SubState::PendingJoin);
                }
            }
        }
        RegistryInner::run_join(self.inner.clone(), id.clone()).await;
    }

    /// Leave immediately. Degrades to local untracking when the hub is not
    /// connected.
    pub async fn leave(&self, id: &ResourceId) {
        let connected = {
            let mut st = self.inner.state.lock().unwrap();
            st.desired.remove(id);
            if let Some(timer) = st.timers.remove(id) {
                timer.abort();
            }
            match st.subs.get(id).copied() {
                None | Some(SubState::PendingLeave) => return,
                Some(SubState::PendingJoin) => {
                    // Never confirmed; local cleanup is enough.
                    st.subs.remove(id);
                    return;
                }
                Some(SubState::Joined { .. }) => {}
            }
            if self.inner.transport.is_connected() {
                st.subs.insert(id.clone(), SubState::PendingLeave);
                true
            } else {
                st.subs.remove(id);
                false
            }
        };
        if connected {
            RegistryInner::run_leave(self.inner.clone(), id.clone()).await;
        }
    }

    /// A deleted resource: forget it entirely, no RPC. The server side is
    /// gone with the resource.
    pub fn drop_resource(&self, id: &ResourceId) {
        let mut st = self.inner.state.lock().unwrap();
        if let Some(timer) = st.timers.remove(id) {
            timer.abort();
        }
        st.subs.remove(id);
        st.desired.remove(id);
    }

    /// Re-issue a join for everything joined before a disconnect. Failures
    /// untrack the resource so a later visibility event retries.
    pub async fn replay_joined(&self) {
        let snapshot = self.joined_snapshot();
        debug!(target: "lagoon::registry", count = snapshot.len(), "replaying subscriptions");
        for id in snapshot {
            let result = self
                .inner
                .transport
                .invoke(rpc::JOIN_RESOURCE_UPDATES, json!(id.as_str()))
                .await;
            if let Err(err) = result {
                warn!(target: "lagoon::registry", %id, %err, "replay join failed");
                self.inner.state.lock().unwrap().subs.remove(&id);
            }
        }
    }

    pub fn joined_snapshot(&self) -> Vec<ResourceId> {
        let st = self.inner.state.lock().unwrap();
        st.subs
            .iter()
            .filter(|(_, state)| matches!(state, SubState::Joined { .. }))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn joined_count(&self) -> usize {
        self.inner.state.lock().unwrap().joined_count()
    }

    /// Joined or on the way to joined. Scheduled refreshes are restricted
    /// to these.
    pub fn is_subscribed(&self, id: &ResourceId) -> bool {
        matches!(
            self.inner.state.lock().unwrap().subs.get(id),
            Some(SubState::Joined { .. }) | Some(SubState::PendingJoin)
        )
    }

    pub fn has_pending_timer(&self, id: &ResourceId) -> bool {
        self.inner.state.lock().unwrap().timers.contains_key(id)
    }

    /// Cancel every timer, forget every subscription, and hand back the ids
    /// that were joined so the caller can best-effort leave them.
    pub fn begin_shutdown(&self) -> Vec<ResourceId> {
        let mut st = self.inner.state.lock().unwrap();
        st.shutdown = true;
        for (_, timer) in st.timers.drain() {
            timer.abort();
        }
        let joined: Vec<_> = st
            .subs
            .iter()
            .filter(|(_, state)| matches!(state, SubState::Joined { .. }))
            .map(|(id, _)| id.clone())
            .collect();
        st.subs.clear();
        st.desired.clear();
        joined
    }
}

fn schedule_settle(
    inner: &Arc<RegistryInner>,
    st: &mut RegistryState,
    id: ResourceId,
    kind: Settle,
) {
    let delay = match kind {
        Settle::Join => inner.config.join_settle,
        Settle::Leave => inner.config.leave_settle,
    };
    let task_inner = inner.clone();
    let task_id = id.clone();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        match kind {
            Settle::Join => RegistryInner::settled_join(task_inner, task_id).await,
            Settle::Leave => RegistryInner::settled_leave(task_inner, task_id).await,
        }
    });
    if let Some(old) = st.timers.insert(id, handle) {
        old.abort();
    }
}

impl RegistryInner {
    /// Join settle elapsed: the resource stayed visible long enough.
    async fn settled_join(inner: Arc<Self>, id: ResourceId) {
        {
            let mut st = inner.state.lock().unwrap();
            st.timers.remove(&id);
            if st.shutdown {
                return;
            }
            if !st.desired.contains(&id) {
                st.subs.remove(&id);
                return;
            }
        }
        Self::run_join(inner, id).await;
    }

    /// Issue the join RPC and settle the outcome. The cap is enforced at
    /// ack time under the state lock so the joined count can never
    /// overshoot, even with several joins in flight.
    async fn run_join(inner: Arc<Self>, id: ResourceId) {
        let result = inner
            .transport
            .invoke(rpc::JOIN_RESOURCE_UPDATES, json!(id.as_str()))
            .await;

        match result {
            Ok(()) => {
                let mut evicted = Vec::new();
                let compensate = {
                    let mut st = inner.state.lock().unwrap();
                    if st.shutdown {
                        return;
                    }
                    if st.desired.contains(&id) {
                        while st.joined_count() >= inner.config.max_joined {
                            match st.oldest_joined() {
                                Some(victim) => {
                                    st.subs.insert(victim.clone(), SubState::PendingLeave);
                                    evicted.push(victim);
                                }
                                None => break,
                            }
                        }
                        let seq = st.next_seq;
                        st.next_seq += 1;
                        st.subs.insert(id.clone(), SubState::Joined { seq });
                        debug!(target: "lagoon::registry", %id, "joined");
                        false
                    } else {
                        // The resource scrolled away while the RPC was in
                        // flight; a silent join would leak fan-out.
                        st.subs.remove(&id);
                        true
                    }
                };
                if compensate {
                    debug!(target: "lagoon::registry", %id, "compensating leave for stale join");
                    let _ = inner
                        .transport
                        .invoke(rpc::LEAVE_RESOURCE_UPDATES, json!(id.as_str()))
                        .await;
                }
                for victim in evicted {
                    debug!(target: "lagoon::registry", id = %victim, "evicted to respect cap");
                    let result = inner
                        .transport
                        .invoke(rpc::LEAVE_RESOURCE_UPDATES, json!(victim.as_str()))
                        .await;
                    if let Err(err) = result {
                        warn!(target: "lagoon::registry", id = %victim, %err, "evict leave failed");
                    }
                    inner.state.lock().unwrap().subs.remove(&victim);
                }
            }
            Err(err) => {
                warn!(target: "lagoon::registry", %id, %err, "join failed; left untracked");
                inner.state.lock().unwrap().subs.remove(&id);
            }
        }
    }

    /// Leave settle elapsed: the resource stayed invisible long enough.
    async fn settled_leave(inner: Arc<Self>, id: ResourceId) {
        {
            let mut st = inner.state.lock().unwrap();
            st.timers.remove(&id);
            if st.shutdown {
                return;
            }
            if st.desired.contains(&id) {
                // Visible again; set_visibility normally cancels the timer
                // first, this is the race-window backstop.
                let seq = st.next_seq;
                st.next_seq += 1;
                st.subs.insert(id.clone(), SubState::Joined { seq });
                return;
            }
            if !inner.transport.is_connected() {
                st.subs.remove(&id);
                trace!(target: "lagoon::registry", %id, "left locally while disconnected");
                return;
            }
        }
        Self::run_leave(inner, id).await;
    }

    async fn run_leave(inner: Arc<Self>, id: ResourceId) {
        let result = inner
            .transport
            .invoke(rpc::LEAVE_RESOURCE_UPDATES, json!(id.as_str()))
            .await;
        if let Err(err) = &result {
            warn!(target: "lagoon::registry", %id, %err, "leave failed");
        } else {
            debug!(target: "lagoon::registry", %id, "left");
        }
        let mut st = inner.state.lock().unwrap();
        st.subs.remove(&id);
        if !st.shutdown && st.desired.contains(&id) {
            // Flipped visible while the leave RPC was in flight: re-enter
            // through a fresh settle window.
            st.subs.insert(id.clone(), SubState::PendingJoin);
            schedule_settle(&inner, &mut st, id, Settle::Join);
        }
    }
}
