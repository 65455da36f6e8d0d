use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cache::MultiCacheWriter;
use crate::error::SyncError;
use crate::fetch::ResourceFetcher;
use crate::model::{PostPatch, ResourceId};
use crate::notify::{self, NotifySender, SyncNotification};

struct OptimisticInner {
    writer: Arc<MultiCacheWriter>,
    fetcher: Arc<dyn ResourceFetcher>,
    notify: NotifySender,
    /// Resources currently shielded from server patch echoes, with the
    /// instant the shield lapses.
    overlays: StdMutex<HashMap<ResourceId, Instant>>,
    ttl: Duration,
}

/// Applies user-initiated mutations locally before the network settles,
/// then reconciles against server truth or rolls back.
#[derive(Clone)]
pub struct OptimisticMutations {
    inner: Arc<OptimisticInner>,
}

impl OptimisticMutations {
    pub fn new(
        writer: Arc<MultiCacheWriter>,
        fetcher: Arc<dyn ResourceFetcher>,
        notify: NotifySender,
        ttl: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(OptimisticInner {
                writer,
                fetcher,
                notify,
                overlays: StdMutex::new(HashMap::new()),
                ttl,
            }),
        }
    }

    /// Run one optimistic mutation: patch immediately, then either
    /// reconcile with an authoritative fetch (success) or revert to the
    /// captured pre-mutation values and raise a failure notification. The
    /// network error itself goes no further.
    pub async fn mutate<F, Fut>(&self, id: &ResourceId, patch: PostPatch, operation: F)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), SyncError>>,
    {
        let revert = self
            .inner
            .writer
            .first_copy(id)
            .map(|current| patch.revert_of(&current));

        self.inner.writer.apply(std::slice::from_ref(id), &patch);
        self.shield(id);

        match operation().await {
            Ok(()) => {
                // Server accepted; overwrite the estimate with truth.
                match self.inner.fetcher.get_by_code(id).await {
                    Ok(post) => self.inner.writer.replace(id, &post),
                    Err(err) => {
                        // Stale optimistic data persists until the next
                        // successful reconciliation.
                        warn!(target: "lagoon::optimistic", %id, %err, "reconcile fetch failed");
                    }
                }
                self.unshield(id);
            }
            Err(err) => {
                debug!(target: "lagoon::optimistic", %id, %err, "mutation failed; rolling back");
                if let Some(revert) = revert {
                    self.inner.writer.apply(std::slice::from_ref(id), &revert);
                }
                self.unshield(id);
                notify::emit(
                    &self.inner.notify,
                    SyncNotification::MutationFailed {
                        id: id.clone(),
                        reason: err.to_string(),
                    },
                );
            }
        }
    }

    /// Toggle the viewer's reaction, deriving the new count from the
    /// currently cached value.
    pub async fn toggle_reaction<F, Fut>(&self, id: &ResourceId, operation: F)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), SyncError>>,
    {
        let Some(current) = self.inner.writer.first_copy(id) else {
            debug!(target: "lagoon::optimistic", %id, "toggle on uncached resource ignored");
            return;
        };
        let was_liked = current.is_like;
        let next_count = if was_liked {
            (current.reaction_count - 1).max(0)
        } else {
            current.reaction_count + 1
        };
        let patch = PostPatch {
            is_like: Some(!was_liked),
            reaction_count: Some(next_count),
            ..Default::default()
        };
        self.mutate(id, patch, operation).await;
    }

    /// Mark the original as reposted by the viewer, deriving the new count
    /// from the cached value.
    pub async fn create_repost<F, Fut>(&self, original: &ResourceId, operation: F)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), SyncError>>,
    {
        let Some(current) = self.inner.writer.first_copy(original) else {
            debug!(target: "lagoon::optimistic", id = %original, "repost of uncached resource ignored");
            return;
        };
        let patch = PostPatch {
            is_reposted_by_current_user: Some(true),
            repost_count: Some(current.repost_count + 1),
            ..Default::default()
        };
        self.mutate(original, patch, operation).await;
    }

    /// While true, server patch events for this resource are ignored so a
    /// slower echo of the user's own action cannot undo it.
    pub fn shields(&self, id: &ResourceId) -> bool {
        let mut overlays = self.inner.overlays.lock().unwrap();
        match overlays.get(id) {
            Some(expiry) if *expiry > Instant::now() => true,
            Some(_) => {
                overlays.remove(id);
                false
            }
            None => false,
        }
    }

    fn shield(&self, id: &ResourceId) {
        self.inner
            .overlays
            .lock()
            .unwrap()
            .insert(id.clone(), Instant::now() + self.inner.ttl);
    }

    fn unshield(&self, id: &ResourceId) {
        self.inner.overlays.lock().unwrap().remove(id);
    }

    pub(crate) fn clear(&self) {
        self.inner.overlays.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheSet, FeedCache, PostCache};
    use crate::fetch::StaticFetcher;
    use crate::model::{Author, Post};
    use tokio::sync::mpsc;

    fn post(code: &str, reaction_count: i64, is_like: bool) -> Post {
        Post {
            code: ResourceId::from(code),
            content: "body".into(),
            media: Vec::new(),
            hashtags: Vec::new(),
            reaction_count,
            comment_count: 0,
            repost_count: 0,
            share_count: 0,
            is_like,
            is_reposted_by_current_user: false,
            is_pin: false,
            privacy: 0,
            status: 1,
            author: Author {
                id: 1,
                full_name: "Author".into(),
                user_name: None,
                avatar_url: None,
            },
            is_repost: false,
            original_post: None,
            create_date: String::new(),
        }
    }

    fn harness(
        seeded: Post,
        server: Option<Post>,
    ) -> (
        OptimisticMutations,
        CacheSet,
        mpsc::UnboundedReceiver<SyncNotification>,
    ) {
        let caches = CacheSet::new();
        caches.feed.set_feed(FeedCache::KEY_ALL, vec![seeded]);
        let fetcher = StaticFetcher::new();
        if let Some(server_post) = server {
            fetcher.put(server_post);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let optimistic = OptimisticMutations::new(
            caches.writer(),
            fetcher,
            tx,
            Duration::from_secs(5),
        );
        (optimistic, caches, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn successful_toggle_reconciles_with_server_truth() {
        // Server says 12, the optimistic guess was 6.
        let (optimistic, caches, _rx) = harness(post("P1", 5, false), Some(post("P1", 12, true)));
        let id = ResourceId::from("P1");

        optimistic.toggle_reaction(&id, || async { Ok(()) }).await;

        let cached = caches.feed.get(&id).unwrap();
        assert!(cached.is_like);
        assert_eq!(cached.reaction_count, 12);
        assert!(!optimistic.shields(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_toggle_reverts_and_notifies() {
        let (optimistic, caches, mut rx) = harness(post("P1", 5, false), None);
        let id = ResourceId::from("P1");

        optimistic
            .toggle_reaction(&id, || async {
                Err(SyncError::Transport("boom".into()))
            })
            .await;

        let cached = caches.feed.get(&id).unwrap();
        assert!(!cached.is_like);
        assert_eq!(cached.reaction_count, 5);
        assert!(matches!(
            rx.try_recv(),
            Ok(SyncNotification::MutationFailed { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn unlike_clamps_count_at_zero() {
        let (optimistic, caches, _rx) = harness(post("P1", 0, true), Some(post("P1", 0, false)));
        let id = ResourceId::from("P1");
        optimistic.toggle_reaction(&id, || async { Ok(()) }).await;
        assert_eq!(caches.feed.get(&id).unwrap().reaction_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn overlay_shields_until_ttl() {
        let (optimistic, _caches, _rx) = harness(post("P1", 5, false), None);
        let id = ResourceId::from("P1");

        // Hold the mutation open so the shield stays up.
        let optimistic2 = optimistic.clone();
        let id2 = id.clone();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            optimistic2
                .mutate(
                    &id2,
                    PostPatch {
                        is_like: Some(true),
                        ..Default::default()
                    },
                    || async {
                        let _ = release_rx.await;
                        Err(SyncError::Transport("late".into()))
                    },
                )
                .await;
        });
        tokio::task::yield_now().await;
        assert!(optimistic.shields(&id));

        let _ = release_tx.send(());
        task.await.unwrap();
        assert!(!optimistic.shields(&id));
    }
}
