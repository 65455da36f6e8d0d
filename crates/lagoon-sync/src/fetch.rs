use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;

use crate::error::SyncError;
use crate::model::{Post, ResourceId};

/// Authoritative one-shot read, used by the refresh scheduler and by
/// optimistic reconciliation. The HTTP client lives with the caller; the
/// engine only needs this seam.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn get_by_code(&self, id: &ResourceId) -> Result<Post, SyncError>;
}

/// Serves snapshots from an in-memory table. Tests script it; the demo
/// binary can preload it when no API is available.
pub struct StaticFetcher {
    posts: StdMutex<HashMap<ResourceId, Post>>,
    fail: StdMutex<bool>,
}

impl StaticFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            posts: StdMutex::new(HashMap::new()),
            fail: StdMutex::new(false),
        })
    }

    pub fn put(&self, post: Post) {
        self.posts.lock().unwrap().insert(post.code.clone(), post);
    }

    /// Make every fetch fail until called with `false` again.
    pub fn set_failing(&self, failing: bool) {
        *self.fail.lock().unwrap() = failing;
    }
}

#[async_trait]
impl ResourceFetcher for StaticFetcher {
    async fn get_by_code(&self, id: &ResourceId) -> Result<Post, SyncError> {
        if *self.fail.lock().unwrap() {
            return Err(SyncError::fetch(id, "scripted fetch failure"));
        }
        self.posts
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::fetch(id, "not found"))
    }
}
