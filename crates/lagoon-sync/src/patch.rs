use serde_json::Value;

use crate::model::{Hashtag, MediaFile, PostPatch};

/// Extract the minimal partial update a payload carries.
///
/// Only allow-listed fields are considered, and a value delivered at the
/// top level of the event (e.g. an explicit count alongside it) overrides
/// the same field inside the nested `post` object. Returns `None` when the
/// payload carries nothing patchable so callers can skip cache writes
/// entirely.
pub fn build(payload: &Value) -> Option<PostPatch> {
    let nested = payload.get("post").filter(|v| v.is_object());

    let patch = PostPatch {
        reaction_count: pick_i64(payload, nested, "reactionCount"),
        comment_count: pick_i64(payload, nested, "commentCount"),
        repost_count: pick_i64(payload, nested, "repostCount"),
        share_count: pick_i64(payload, nested, "shareCount"),
        content: pick(payload, nested, "content")
            .and_then(Value::as_str)
            .map(str::to_string),
        media: pick(payload, nested, "media")
            .cloned()
            .and_then(|v| serde_json::from_value::<Vec<MediaFile>>(v).ok()),
        hashtags: pick(payload, nested, "hashtags")
            .cloned()
            .and_then(|v| serde_json::from_value::<Vec<Hashtag>>(v).ok()),
        is_like: pick_bool(payload, nested, "isLike"),
        is_reposted_by_current_user: pick_bool(payload, nested, "isRepostedByCurrentUser"),
        is_pin: pick_bool(payload, nested, "isPin"),
        privacy: pick_i64(payload, nested, "privacy").map(|v| v as i32),
        status: pick_i64(payload, nested, "status").map(|v| v as i32),
    };

    if patch.is_empty() { None } else { Some(patch) }
}

fn pick<'v>(top: &'v Value, nested: Option<&'v Value>, key: &str) -> Option<&'v Value> {
    top.get(key)
        .filter(|v| !v.is_null())
        .or_else(|| nested.and_then(|n| n.get(key)).filter(|v| !v.is_null()))
}

fn pick_i64(top: &Value, nested: Option<&Value>, key: &str) -> Option<i64> {
    pick(top, nested, key).and_then(Value::as_i64)
}

fn pick_bool(top: &Value, nested: Option<&Value>, key: &str) -> Option<bool> {
    pick(top, nested, key).and_then(Value::as_bool)
}
