use std::sync::Arc;

use tracing::debug;

use crate::model::{Post, PostPatch, ResourceId};

pub mod stores;

pub use stores::{DetailCache, FeedCache, ProfileCache, SearchCache};

/// One independent read cache. Each implementation owns its own copies of
/// the snapshots it holds; nothing is shared between caches.
pub trait PostCache: Send + Sync {
    fn name(&self) -> &'static str;

    /// First copy of the resource held by this cache, if any.
    fn get(&self, id: &ResourceId) -> Option<Post>;

    fn contains(&self, id: &ResourceId) -> bool {
        self.get(id).is_some()
    }

    /// Run `apply` over every copy of the resource this cache holds,
    /// including a copy nested as the original behind a repost card.
    /// Returns true when at least one copy was visited.
    fn update(&self, id: &ResourceId, apply: &mut dyn FnMut(&mut Post)) -> bool;

    /// Merge a partial update into every held copy. A cache that does not
    /// hold the resource is left untouched.
    fn patch(&self, id: &ResourceId, patch: &PostPatch) -> bool {
        self.update(id, &mut |post| patch.apply_to(post))
    }

    /// Overwrite every held copy with an authoritative snapshot.
    fn replace(&self, id: &ResourceId, post: &Post) -> bool {
        self.update(id, &mut |copy| *copy = post.clone())
    }

    fn remove(&self, id: &ResourceId);

    /// Offer a newly created resource. Each cache decides whether it wants
    /// it; most ignore it.
    fn insert(&self, post: &Post);
}

/// The four caches one session maintains, plus a writer that replays the
/// same mutation into all of them.
pub struct CacheSet {
    pub feed: Arc<FeedCache>,
    pub search: Arc<SearchCache>,
    pub profile: Arc<ProfileCache>,
    pub detail: Arc<DetailCache>,
}

impl CacheSet {
    pub fn new() -> Self {
        Self {
            feed: FeedCache::new(),
            search: SearchCache::new(),
            profile: ProfileCache::new(),
            detail: DetailCache::new(),
        }
    }

    pub fn writer(&self) -> Arc<MultiCacheWriter> {
        MultiCacheWriter::new(vec![
            self.feed.clone() as Arc<dyn PostCache>,
            self.search.clone() as Arc<dyn PostCache>,
            self.profile.clone() as Arc<dyn PostCache>,
            self.detail.clone() as Arc<dyn PostCache>,
        ])
    }
}

impl Default for CacheSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Applies one event's effect to every cache. Writes are independent and
/// order-insensitive; there is no cross-cache transaction.
pub struct MultiCacheWriter {
    caches: Vec<Arc<dyn PostCache>>,
}

impl MultiCacheWriter {
    pub fn new(caches: Vec<Arc<dyn PostCache>>) -> Arc<Self> {
        Arc::new(Self { caches })
    }

    /// Patch every cache holding any of `ids`. Returns how many cache
    /// entries were touched.
    pub fn apply(&self, ids: &[ResourceId], patch: &PostPatch) -> usize {
        let mut touched = 0;
        for id in ids {
            for cache in &self.caches {
                if cache.patch(id, patch) {
                    touched += 1;
                }
            }
        }
        if touched > 0 {
            debug!(target: "lagoon::cache", touched, "patch applied");
        }
        touched
    }

    /// Repost without an explicit count: bump each held copy off its own
    /// previous value.
    pub fn bump_repost(&self, id: &ResourceId) -> usize {
        let mut touched = 0;
        for cache in &self.caches {
            if cache.update(id, &mut |post| post.repost_count += 1) {
                touched += 1;
            }
        }
        touched
    }

    pub fn replace(&self, id: &ResourceId, post: &Post) {
        for cache in &self.caches {
            cache.replace(id, post);
        }
    }

    pub fn remove(&self, id: &ResourceId) {
        for cache in &self.caches {
            cache.remove(id);
        }
    }

    pub fn insert(&self, post: &Post) {
        for cache in &self.caches {
            cache.insert(post);
        }
    }

    pub fn holds(&self, id: &ResourceId) -> bool {
        self.caches.iter().any(|cache| cache.contains(id))
    }

    /// First copy found across the caches, used to derive optimistic
    /// toggles and revert patches.
    pub fn first_copy(&self, id: &ResourceId) -> Option<Post> {
        self.caches.iter().find_map(|cache| cache.get(id))
    }
}
