use std::fmt;

use serde::{Deserialize, Serialize};

/// Server-issued post code. Every cache, subscription and timer is keyed by
/// this.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(code: &str) -> Self {
        Self(code.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub id: i64,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFile {
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub file_type: String,
    #[serde(default)]
    pub url_file: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hashtag {
    #[serde(default)]
    pub code: String,
    pub tag: String,
    pub normalized: String,
}

/// One resource snapshot as the caches hold it. Caches never share a copy;
/// consistency comes from replaying the same patch into each of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub code: ResourceId,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub media: Vec<MediaFile>,
    #[serde(default)]
    pub hashtags: Vec<Hashtag>,
    #[serde(default)]
    pub reaction_count: i64,
    #[serde(default)]
    pub comment_count: i64,
    #[serde(default)]
    pub repost_count: i64,
    #[serde(default)]
    pub share_count: i64,
    #[serde(default)]
    pub is_like: bool,
    #[serde(default)]
    pub is_reposted_by_current_user: bool,
    #[serde(default)]
    pub is_pin: bool,
    #[serde(default)]
    pub privacy: i32,
    #[serde(default)]
    pub status: i32,
    #[serde(rename = "user")]
    pub author: Author,
    #[serde(default)]
    pub is_repost: bool,
    #[serde(default)]
    pub original_post: Option<Box<Post>>,
    #[serde(default)]
    pub create_date: String,
}

/// Partial update carrying only the fields the payload explicitly named.
/// Applying a patch never resets a field it does not mention.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reaction_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repost_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub share_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<Vec<MediaFile>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hashtags: Option<Vec<Hashtag>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_like: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_reposted_by_current_user: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_pin: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub privacy: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<i32>,
}

impl PostPatch {
    pub fn is_empty(&self) -> bool {
        self.reaction_count.is_none()
            && self.comment_count.is_none()
            && self.repost_count.is_none()
            && self.share_count.is_none()
            && self.content.is_none()
            && self.media.is_none()
            && self.hashtags.is_none()
            && self.is_like.is_none()
            && self.is_reposted_by_current_user.is_none()
            && self.is_pin.is_none()
            && self.privacy.is_none()
            && self.status.is_none()
    }

    /// Merge into a snapshot, touching only the present fields.
    pub fn apply_to(&self, post: &mut Post) {
        if let Some(v) = self.reaction_count {
            post.reaction_count = v;
        }
        if let Some(v) = self.comment_count {
            post.comment_count = v;
        }
        if let Some(v) = self.repost_count {
            post.repost_count = v;
        }
        if let Some(v) = self.share_count {
            post.share_count = v;
        }
        if let Some(v) = &self.content {
            post.content = v.clone();
        }
        if let Some(v) = &self.media {
            post.media = v.clone();
        }
        if let Some(v) = &self.hashtags {
            post.hashtags = v.clone();
        }
        if let Some(v) = self.is_like {
            post.is_like = v;
        }
        if let Some(v) = self.is_reposted_by_current_user {
            post.is_reposted_by_current_user = v;
        }
        if let Some(v) = self.is_pin {
            post.is_pin = v;
        }
        if let Some(v) = self.privacy {
            post.privacy = v;
        }
        if let Some(v) = self.status {
            post.status = v;
        }
    }

    /// The inverse patch: for every field this patch touches, the value the
    /// snapshot currently holds. Used to roll back optimistic writes.
    pub fn revert_of(&self, current: &Post) -> PostPatch {
        PostPatch {
            reaction_count: self.reaction_count.map(|_| current.reaction_count),
            comment_count: self.comment_count.map(|_| current.comment_count),
            repost_count: self.repost_count.map(|_| current.repost_count),
            share_count: self.share_count.map(|_| current.share_count),
            content: self.content.as_ref().map(|_| current.content.clone()),
            media: self.media.as_ref().map(|_| current.media.clone()),
            hashtags: self.hashtags.as_ref().map(|_| current.hashtags.clone()),
            is_like: self.is_like.map(|_| current.is_like),
            is_reposted_by_current_user: self
                .is_reposted_by_current_user
                .map(|_| current.is_reposted_by_current_user),
            is_pin: self.is_pin.map(|_| current.is_pin),
            privacy: self.privacy.map(|_| current.privacy),
            status: self.status.map(|_| current.status),
        }
    }
}
