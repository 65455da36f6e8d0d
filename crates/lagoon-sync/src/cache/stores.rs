use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::PostCache;
use crate::model::{Post, ResourceId};

/// Visit every copy of `id` inside one entry: the entry itself and, for a
/// repost card, the original nested behind it.
fn visit(post: &mut Post, id: &ResourceId, apply: &mut dyn FnMut(&mut Post)) -> bool {
    let mut hit = false;
    if &post.code == id {
        apply(post);
        hit = true;
    }
    if let Some(original) = post.original_post.as_deref_mut() {
        if &original.code == id {
            apply(original);
            hit = true;
        }
    }
    hit
}

fn find_in(posts: &[Post], id: &ResourceId) -> Option<Post> {
    posts.iter().find_map(|post| {
        if &post.code == id {
            return Some(post.clone());
        }
        post.original_post
            .as_deref()
            .filter(|original| &original.code == id)
            .map(|original| original.clone())
    })
}

/// Scrollable home feeds, one page list per feed key. Keys are `all` for
/// the main feed or `tag:<normalized>` for a hashtag feed.
pub struct FeedCache {
    feeds: RwLock<HashMap<String, Vec<Post>>>,
}

impl FeedCache {
    pub const KEY_ALL: &'static str = "all";

    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            feeds: RwLock::new(HashMap::new()),
        })
    }

    pub fn set_feed(&self, key: &str, posts: Vec<Post>) {
        self.feeds.write().unwrap().insert(key.to_string(), posts);
    }

    /// Create the feed if missing so creation events have somewhere to land.
    pub fn ensure_feed(&self, key: &str) {
        self.feeds
            .write()
            .unwrap()
            .entry(key.to_string())
            .or_default();
    }

    pub fn feed(&self, key: &str) -> Vec<Post> {
        self.feeds
            .read()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    fn key_matches(key: &str, post: &Post) -> bool {
        if key == Self::KEY_ALL {
            return true;
        }
        match key.strip_prefix("tag:") {
            Some(tag) => post.hashtags.iter().any(|h| h.normalized == tag),
            None => false,
        }
    }
}

impl PostCache for FeedCache {
    fn name(&self) -> &'static str {
        "feed"
    }

    fn get(&self, id: &ResourceId) -> Option<Post> {
        let feeds = self.feeds.read().unwrap();
        feeds.values().find_map(|posts| find_in(posts, id))
    }

    fn update(&self, id: &ResourceId, apply: &mut dyn FnMut(&mut Post)) -> bool {
        let mut feeds = self.feeds.write().unwrap();
        let mut hit = false;
        for posts in feeds.values_mut() {
            for post in posts.iter_mut() {
                hit |= visit(post, id, apply);
            }
        }
        hit
    }

    fn remove(&self, id: &ResourceId) {
        let mut feeds = self.feeds.write().unwrap();
        for posts in feeds.values_mut() {
            posts.retain(|post| &post.code != id);
        }
    }

    fn insert(&self, post: &Post) {
        let mut feeds = self.feeds.write().unwrap();
        for (key, posts) in feeds.iter_mut() {
            if Self::key_matches(key, post) && !posts.iter().any(|p| p.code == post.code) {
                posts.insert(0, post.clone());
            }
        }
    }
}

/// Search result pages keyed by query string. Creations never appear here
/// until the user searches again.
pub struct SearchCache {
    results: RwLock<HashMap<String, Vec<Post>>>,
}

impl SearchCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            results: RwLock::new(HashMap::new()),
        })
    }

    pub fn set_results(&self, query: &str, posts: Vec<Post>) {
        self.results
            .write()
            .unwrap()
            .insert(query.to_string(), posts);
    }

    pub fn results(&self, query: &str) -> Vec<Post> {
        self.results
            .read()
            .unwrap()
            .get(query)
            .cloned()
            .unwrap_or_default()
    }
}

impl PostCache for SearchCache {
    fn name(&self) -> &'static str {
        "search"
    }

    fn get(&self, id: &ResourceId) -> Option<Post> {
        let results = self.results.read().unwrap();
        results.values().find_map(|posts| find_in(posts, id))
    }

    fn update(&self, id: &ResourceId, apply: &mut dyn FnMut(&mut Post)) -> bool {
        let mut results = self.results.write().unwrap();
        let mut hit = false;
        for posts in results.values_mut() {
            for post in posts.iter_mut() {
                hit |= visit(post, id, apply);
            }
        }
        hit
    }

    fn remove(&self, id: &ResourceId) {
        let mut results = self.results.write().unwrap();
        for posts in results.values_mut() {
            posts.retain(|post| &post.code != id);
        }
    }

    fn insert(&self, _post: &Post) {}
}

/// Per-profile post lists keyed by author id.
pub struct ProfileCache {
    pages: RwLock<HashMap<i64, Vec<Post>>>,
}

impl ProfileCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pages: RwLock::new(HashMap::new()),
        })
    }

    pub fn set_posts(&self, user_id: i64, posts: Vec<Post>) {
        self.pages.write().unwrap().insert(user_id, posts);
    }

    pub fn posts(&self, user_id: i64) -> Vec<Post> {
        self.pages
            .read()
            .unwrap()
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl PostCache for ProfileCache {
    fn name(&self) -> &'static str {
        "profile"
    }

    fn get(&self, id: &ResourceId) -> Option<Post> {
        let pages = self.pages.read().unwrap();
        pages.values().find_map(|posts| find_in(posts, id))
    }

    fn update(&self, id: &ResourceId, apply: &mut dyn FnMut(&mut Post)) -> bool {
        let mut pages = self.pages.write().unwrap();
        let mut hit = false;
        for posts in pages.values_mut() {
            for post in posts.iter_mut() {
                hit |= visit(post, id, apply);
            }
        }
        hit
    }

    fn remove(&self, id: &ResourceId) {
        let mut pages = self.pages.write().unwrap();
        for posts in pages.values_mut() {
            posts.retain(|post| &post.code != id);
        }
    }

    fn insert(&self, post: &Post) {
        let mut pages = self.pages.write().unwrap();
        if let Some(posts) = pages.get_mut(&post.author.id) {
            if !posts.iter().any(|p| p.code == post.code) {
                posts.insert(0, post.clone());
            }
        }
    }
}

/// Single-resource detail view, one snapshot per opened post.
pub struct DetailCache {
    entries: RwLock<HashMap<ResourceId, Post>>,
}

impl DetailCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: RwLock::new(HashMap::new()),
        })
    }

    /// The detail cache is filled explicitly when a detail screen opens.
    pub fn put(&self, post: Post) {
        self.entries.write().unwrap().insert(post.code.clone(), post);
    }
}

impl PostCache for DetailCache {
    fn name(&self) -> &'static str {
        "detail"
    }

    fn get(&self, id: &ResourceId) -> Option<Post> {
        let entries = self.entries.read().unwrap();
        if let Some(post) = entries.get(id) {
            return Some(post.clone());
        }
        entries.values().find_map(|post| {
            post.original_post
                .as_deref()
                .filter(|original| &original.code == id)
                .map(|original| original.clone())
        })
    }

    fn update(&self, id: &ResourceId, apply: &mut dyn FnMut(&mut Post)) -> bool {
        let mut entries = self.entries.write().unwrap();
        let mut hit = false;
        for post in entries.values_mut() {
            hit |= visit(post, id, apply);
        }
        hit
    }

    fn remove(&self, id: &ResourceId) {
        self.entries.write().unwrap().remove(id);
    }

    fn insert(&self, _post: &Post) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheSet;
    use crate::model::{Author, Hashtag, PostPatch};

    fn post(code: &str) -> Post {
        Post {
            code: ResourceId::from(code),
            content: format!("content of {code}"),
            media: Vec::new(),
            hashtags: Vec::new(),
            reaction_count: 0,
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

    fn repost(code: &str, original: Post) -> Post {
        Post {
            is_repost: true,
            original_post: Some(Box::new(original)),
            ..post(code)
        }
    }

    #[test]
    fn patch_does_not_insert() {
        let cache = FeedCache::new();
        cache.set_feed(FeedCache::KEY_ALL, vec![post("P1")]);
        let patch = PostPatch {
            reaction_count: Some(9),
            ..Default::default()
        };
        assert!(!cache.patch(&ResourceId::from("P2"), &patch));
        assert!(cache.get(&ResourceId::from("P2")).is_none());
    }

    #[test]
    fn patch_reaches_nested_original() {
        let cache = FeedCache::new();
        cache.set_feed(FeedCache::KEY_ALL, vec![repost("P9", post("P1"))]);
        let patch = PostPatch {
            reaction_count: Some(7),
            ..Default::default()
        };
        assert!(cache.patch(&ResourceId::from("P1"), &patch));
        let card = cache.get(&ResourceId::from("P9")).unwrap();
        assert_eq!(card.original_post.unwrap().reaction_count, 7);
    }

    #[test]
    fn insert_respects_feed_filter() {
        let cache = FeedCache::new();
        cache.ensure_feed(FeedCache::KEY_ALL);
        cache.ensure_feed("tag:fitness");

        let mut tagged = post("P5");
        tagged.hashtags.push(Hashtag {
            code: "h1".into(),
            tag: "#Fitness".into(),
            normalized: "fitness".into(),
        });
        cache.insert(&tagged);
        cache.insert(&post("P6"));

        assert_eq!(cache.feed(FeedCache::KEY_ALL).len(), 2);
        let tag_feed = cache.feed("tag:fitness");
        assert_eq!(tag_feed.len(), 1);
        assert_eq!(tag_feed[0].code, ResourceId::from("P5"));
    }

    #[test]
    fn insert_is_deduplicated() {
        let cache = FeedCache::new();
        cache.ensure_feed(FeedCache::KEY_ALL);
        cache.insert(&post("P1"));
        cache.insert(&post("P1"));
        assert_eq!(cache.feed(FeedCache::KEY_ALL).len(), 1);
    }

    #[test]
    fn writer_removes_everywhere() {
        let caches = CacheSet::new();
        caches.feed.set_feed(FeedCache::KEY_ALL, vec![post("P1")]);
        caches.search.set_results("hello", vec![post("P1")]);
        caches.profile.set_posts(1, vec![post("P1")]);
        caches.detail.put(post("P1"));

        let writer = caches.writer();
        let id = ResourceId::from("P1");
        assert!(writer.holds(&id));
        writer.remove(&id);
        assert!(!writer.holds(&id));
    }

    #[test]
    fn bump_repost_derives_from_each_copy() {
        let caches = CacheSet::new();
        let mut feed_copy = post("P1");
        feed_copy.repost_count = 4;
        let mut detail_copy = post("P1");
        detail_copy.repost_count = 6;
        caches.feed.set_feed(FeedCache::KEY_ALL, vec![feed_copy]);
        caches.detail.put(detail_copy);

        let writer = caches.writer();
        writer.bump_repost(&ResourceId::from("P1"));

        assert_eq!(
            caches.feed.get(&ResourceId::from("P1")).unwrap().repost_count,
            5
        );
        assert_eq!(
            caches
                .detail
                .get(&ResourceId::from("P1"))
                .unwrap()
                .repost_count,
            7
        );
    }
}
