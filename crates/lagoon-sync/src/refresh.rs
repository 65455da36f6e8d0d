use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::MultiCacheWriter;
use crate::fetch::ResourceFetcher;
use crate::model::ResourceId;

struct RefreshInner {
    fetcher: Arc<dyn ResourceFetcher>,
    writer: Arc<MultiCacheWriter>,
    /// One pending refresh per resource; (generation, task). The generation
    /// lets a finished task clean up after itself without clobbering a
    /// newer reschedule.
    timers: StdMutex<HashMap<ResourceId, (u64, JoinHandle<()>)>>,
    next_gen: StdMutex<u64>,
}

/// Debounced fallback for events whose partial patch is not enough: fetch
/// the authoritative snapshot once and replace every cached copy with it.
#[derive(Clone)]
pub struct RefreshScheduler {
    inner: Arc<RefreshInner>,
}

impl RefreshScheduler {
    pub fn new(fetcher: Arc<dyn ResourceFetcher>, writer: Arc<MultiCacheWriter>) -> Self {
        Self {
            inner: Arc::new(RefreshInner {
                fetcher,
                writer,
                timers: StdMutex::new(HashMap::new()),
                next_gen: StdMutex::new(0),
            }),
        }
    }

    /// Cancel-then-set: repeated triggers inside the window coalesce into
    /// one timer, and at most one scheduled refresh per resource is ever in
    /// flight.
    pub fn schedule(&self, id: &ResourceId, delay: Duration) {
        let generation = {
            let mut next = self.inner.next_gen.lock().unwrap();
            *next += 1;
            *next
        };
        let inner = self.inner.clone();
        let task_id = id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match inner.fetcher.get_by_code(&task_id).await {
                Ok(post) => {
                    // Full replace supersedes any partial patches applied
                    // in the meantime.
                    inner.writer.replace(&task_id, &post);
                    debug!(target: "lagoon::refresh", id = %task_id, "refreshed from server");
                }
                Err(err) => {
                    warn!(target: "lagoon::refresh", id = %task_id, %err, "refresh fetch failed");
                }
            }
            let mut timers = inner.timers.lock().unwrap();
            if let Some((current, _)) = timers.get(&task_id) {
                if *current == generation {
                    timers.remove(&task_id);
                }
            }
        });
        let mut timers = self.inner.timers.lock().unwrap();
        if let Some((_, old)) = timers.insert(id.clone(), (generation, handle)) {
            old.abort();
        }
    }

    pub fn cancel(&self, id: &ResourceId) {
        if let Some((_, task)) = self.inner.timers.lock().unwrap().remove(id) {
            task.abort();
        }
    }

    pub fn has_pending(&self, id: &ResourceId) -> bool {
        self.inner.timers.lock().unwrap().contains_key(id)
    }

    pub fn shutdown(&self) {
        let mut timers = self.inner.timers.lock().unwrap();
        for (_, (_, task)) in timers.drain() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheSet, FeedCache, PostCache};
    use crate::fetch::StaticFetcher;
    use crate::model::{Author, Post};

    fn post(code: &str, reaction_count: i64) -> Post {
        Post {
            code: ResourceId::from(code),
            content: "body".into(),
            media: Vec::new(),
            hashtags: Vec::new(),
            reaction_count,
            comment_count: 0,
            repost_count: 0,
            share_count: 0,
            is_like: false,
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

    #[tokio::test(start_paused = true)]
    async fn fires_once_and_replaces_snapshot() {
        let caches = CacheSet::new();
        caches.feed.set_feed(FeedCache::KEY_ALL, vec![post("P1", 1)]);
        let fetcher = StaticFetcher::new();
        fetcher.put(post("P1", 42));

        let scheduler = RefreshScheduler::new(fetcher, caches.writer());
        let id = ResourceId::from("P1");
        scheduler.schedule(&id, Duration::from_millis(300));
        assert!(scheduler.has_pending(&id));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!scheduler.has_pending(&id));
        assert_eq!(caches.feed.get(&id).unwrap().reaction_count, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_replaces_the_pending_timer() {
        let caches = CacheSet::new();
        caches.feed.set_feed(FeedCache::KEY_ALL, vec![post("P1", 1)]);
        let fetcher = StaticFetcher::new();
        fetcher.put(post("P1", 42));

        let scheduler = RefreshScheduler::new(fetcher, caches.writer());
        let id = ResourceId::from("P1");
        scheduler.schedule(&id, Duration::from_millis(300));
        tokio::time::sleep(Duration::from_millis(200)).await;
        // Coalesce: the first timer dies, the second starts its window over.
        scheduler.schedule(&id, Duration::from_millis(300));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(caches.feed.get(&id).unwrap().reaction_count, 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(caches.feed.get(&id).unwrap().reaction_count, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_failure_drops_the_timer() {
        let caches = CacheSet::new();
        caches.feed.set_feed(FeedCache::KEY_ALL, vec![post("P1", 1)]);
        let fetcher = StaticFetcher::new();
        fetcher.set_failing(true);

        let scheduler = RefreshScheduler::new(fetcher, caches.writer());
        let id = ResourceId::from("P1");
        scheduler.schedule(&id, Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Stale data persists until the next trigger.
        assert!(!scheduler.has_pending(&id));
        assert_eq!(caches.feed.get(&id).unwrap().reaction_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_the_fetch() {
        let caches = CacheSet::new();
        caches.feed.set_feed(FeedCache::KEY_ALL, vec![post("P1", 1)]);
        let fetcher = StaticFetcher::new();
        fetcher.put(post("P1", 42));

        let scheduler = RefreshScheduler::new(fetcher, caches.writer());
        let id = ResourceId::from("P1");
        scheduler.schedule(&id, Duration::from_millis(100));
        scheduler.cancel(&id);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(caches.feed.get(&id).unwrap().reaction_count, 1);
    }
}
