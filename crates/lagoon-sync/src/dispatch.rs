use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, trace};

use crate::cache::MultiCacheWriter;
use crate::config::SyncConfig;
use crate::model::{Post, ResourceId};
use crate::notify::{self, NotifySender, SyncNotification};
use crate::optimistic::OptimisticMutations;
use crate::protocol::{self, HubEvent, UpdateKind, events};
use crate::refresh::RefreshScheduler;
use crate::registry::SubscriptionRegistry;
use crate::patch;
use crate::resolve::{self, IdentitySet};

/// Routes every named hub event to the resolver, patch builder, caches and
/// refresh scheduler. Dropping an unrecognized or malformed event is always
/// preferred over guessing at cache contents.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<DispatchInner>,
}

struct DispatchInner {
    writer: Arc<MultiCacheWriter>,
    registry: SubscriptionRegistry,
    scheduler: RefreshScheduler,
    optimistic: OptimisticMutations,
    notify: NotifySender,
    config: SyncConfig,
}

impl EventDispatcher {
    pub fn new(
        writer: Arc<MultiCacheWriter>,
        registry: SubscriptionRegistry,
        scheduler: RefreshScheduler,
        optimistic: OptimisticMutations,
        notify: NotifySender,
        config: SyncConfig,
    ) -> Self {
        Self {
            inner: Arc::new(DispatchInner {
                writer,
                registry,
                scheduler,
                optimistic,
                notify,
                config,
            }),
        }
    }

    pub async fn dispatch(&self, event: HubEvent) {
        match event.name.as_str() {
            events::POST_LIKED
            | events::POST_UNLIKED
            | events::COMMENT_LIKED
            | events::COMMENT_UNLIKED => self.reaction_delta(&event.payload),
            events::POST_REPOSTED => self.repost(&event.payload),
            events::POST_CREATED => self.creation(&event.payload),
            events::POST_UPDATED => self.structural_update(&event.payload),
            events::COMMENT_ADDED | events::COMMENT_UPDATED | events::COMMENT_DELETED => {
                self.comment_change(&event.payload)
            }
            events::FRIEND_REQUEST_EVENT => notify::emit(
                &self.inner.notify,
                SyncNotification::FriendRequest(event.payload),
            ),
            events::UNREAD_COUNT_CHANGED => notify::emit(
                &self.inner.notify,
                SyncNotification::UnreadCount(event.payload),
            ),
            events::TYPING_STATUS_CHANGED => {
                notify::emit(&self.inner.notify, SyncNotification::Typing(event.payload))
            }
            other => {
                trace!(target: "lagoon::dispatch", event = other, "unrecognized event dropped");
            }
        }
    }

    /// Pure count/flag delta. The patch is sufficient by definition, so
    /// these never schedule a refresh.
    fn reaction_delta(&self, payload: &Value) {
        let ids = resolve::resolve(payload);
        if ids.is_empty() {
            trace!(target: "lagoon::dispatch", "reaction event without identity dropped");
            return;
        }
        let Some(built) = patch::build(payload) else {
            return;
        };
        let targets = self.unshielded(&ids);
        self.inner.writer.apply(&targets, &built);
    }

    /// A repost touches two resources: the new card and the original it
    /// points at. Without an explicit count the original's counter is
    /// derived from each cache's previous value.
    fn repost(&self, payload: &Value) {
        let ids = resolve::resolve(payload);
        if ids.is_empty() {
            trace!(target: "lagoon::dispatch", "repost event without identity dropped");
            return;
        }
        let built = patch::build(payload);
        if let Some(built) = &built {
            let targets = self.unshielded(&ids);
            self.inner.writer.apply(&targets, built);
        }
        let has_explicit_count = built
            .as_ref()
            .map(|p| p.repost_count.is_some())
            .unwrap_or(false);
        if !has_explicit_count {
            for id in resolve::originals(payload) {
                if self.inner.optimistic.shields(&id) {
                    continue;
                }
                self.inner.writer.bump_repost(&id);
            }
        }
    }

    fn creation(&self, payload: &Value) {
        let snapshot = payload
            .get("post")
            .cloned()
            .or_else(|| payload.as_object().map(|_| payload.clone()))
            .and_then(|value| serde_json::from_value::<Post>(value).ok());
        match snapshot {
            Some(post) => {
                debug!(target: "lagoon::dispatch", id = %post.code, "post created");
                self.inner.writer.insert(&post);
            }
            None => {
                trace!(target: "lagoon::dispatch", "creation event without snapshot dropped")
            }
        }
    }

    /// `PostUpdated` multiplexes structural and field changes behind a
    /// numeric code.
    fn structural_update(&self, payload: &Value) {
        let ids = resolve::resolve(payload);
        let kind = protocol::update_code(payload)
            .map(|code| code.kind())
            .unwrap_or(UpdateKind::Patch);
        match kind {
            UpdateKind::Delete => {
                let Some(primary) = ids.primary else {
                    trace!(target: "lagoon::dispatch", "delete without identity dropped");
                    return;
                };
                self.delete(&primary);
            }
            UpdateKind::Create => self.creation(payload),
            UpdateKind::Patch => {
                if ids.is_empty() {
                    trace!(target: "lagoon::dispatch", "update without identity dropped");
                    return;
                }
                match patch::build(payload) {
                    Some(built) => {
                        let targets = self.unshielded(&ids);
                        self.inner.writer.apply(&targets, &built);
                    }
                    None => self.fallback_refresh(ids.primary.as_ref()),
                }
            }
        }
    }

    /// Deletion is an instruction, not a patch: purge the resource from
    /// every cache and drop all pending state keyed by it.
    fn delete(&self, id: &ResourceId) {
        debug!(target: "lagoon::dispatch", %id, "post deleted");
        self.inner.writer.remove(id);
        self.inner.registry.drop_resource(id);
        self.inner.scheduler.cancel(id);
    }

    fn comment_change(&self, payload: &Value) {
        let ids = resolve::resolve(payload);
        if ids.is_empty() {
            trace!(target: "lagoon::dispatch", "comment event without identity dropped");
            return;
        }
        match patch::build(payload) {
            Some(built) => {
                let targets = self.unshielded(&ids);
                self.inner.writer.apply(&targets, &built);
            }
            // The comment list itself lives server-side; refetch the post
            // so its counters catch up.
            None => self.fallback_refresh(ids.primary.as_ref()),
        }
    }

    /// Schedule the debounced authoritative re-fetch, but only for
    /// resources we are subscribed to. Background resources keep whatever
    /// partial state they had.
    fn fallback_refresh(&self, id: Option<&ResourceId>) {
        let Some(id) = id else { return };
        if self.inner.registry.is_subscribed(id) {
            self.inner
                .scheduler
                .schedule(id, self.inner.config.refresh_delay);
        }
    }

    /// Resources under an optimistic overlay are skipped so a slow echo of
    /// the user's own action cannot undo it.
    fn unshielded(&self, ids: &IdentitySet) -> Vec<ResourceId> {
        ids.all()
            .into_iter()
            .filter(|id| {
                let shielded = self.inner.optimistic.shields(id);
                if shielded {
                    trace!(target: "lagoon::dispatch", %id, "patch suppressed by optimistic overlay");
                }
                !shielded
            })
            .collect()
    }
}
