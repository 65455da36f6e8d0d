use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Server push event names carried on the hub.
pub mod events {
    pub const POST_LIKED: &str = "PostLiked";
    pub const POST_UNLIKED: &str = "PostUnliked";
    pub const POST_REPOSTED: &str = "PostReposted";
    pub const POST_CREATED: &str = "PostCreated";
    pub const POST_UPDATED: &str = "PostUpdated";
    pub const COMMENT_ADDED: &str = "CommentAdded";
    pub const COMMENT_UPDATED: &str = "CommentUpdated";
    pub const COMMENT_DELETED: &str = "CommentDeleted";
    pub const COMMENT_LIKED: &str = "CommentLiked";
    pub const COMMENT_UNLIKED: &str = "CommentUnliked";
    pub const TYPING_STATUS_CHANGED: &str = "TypingStatusChanged";
    pub const FRIEND_REQUEST_EVENT: &str = "FriendRequestEvent";
    pub const UNREAD_COUNT_CHANGED: &str = "UnreadCountChanged";
}

/// Hub method names the client invokes.
pub mod rpc {
    pub const JOIN_RESOURCE_UPDATES: &str = "JoinResourceUpdates";
    pub const LEAVE_RESOURCE_UPDATES: &str = "LeaveResourceUpdates";
    pub const JOIN_USER_NOTIFY: &str = "JoinUserNotify";
    pub const JOIN_ROOM: &str = "JoinRoom";
    pub const LEAVE_ROOM: &str = "LeaveRoom";
    pub const PING_ACTIVE_ROOM: &str = "PingActiveRoom";
    pub const SET_INACTIVE_IN_ROOM: &str = "SetInactiveInRoom";
    pub const TYPING: &str = "Typing";
}

/// One pushed event: a name and whatever the server attached to it.
#[derive(Debug, Clone)]
pub struct HubEvent {
    pub name: String,
    pub payload: Value,
}

impl HubEvent {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

/// Numeric `type` discriminator some servers attach to `PostUpdated`.
/// The exact codes are server configuration; everything unrecognized is
/// treated as a plain field patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateCode(pub u16);

impl UpdateCode {
    pub const CREATE: Self = Self(1);
    pub const EDIT: Self = Self(2);
    pub const DELETE: Self = Self(3);
    pub const PIN: Self = Self(4);
    pub const UNPIN: Self = Self(5);

    pub fn kind(self) -> UpdateKind {
        match self {
            Self::CREATE => UpdateKind::Create,
            Self::DELETE => UpdateKind::Delete,
            _ => UpdateKind::Patch,
        }
    }
}

impl Serialize for UpdateCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for UpdateCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let code = u16::deserialize(deserializer)?;
        Ok(UpdateCode(code))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    Create,
    Delete,
    Patch,
}

/// Read the structural code off a payload, if any.
pub fn update_code(payload: &Value) -> Option<UpdateCode> {
    payload
        .get("type")
        .and_then(Value::as_u64)
        .and_then(|code| u16::try_from(code).ok())
        .map(UpdateCode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn structural_codes_map_to_kinds() {
        assert_eq!(UpdateCode::CREATE.kind(), UpdateKind::Create);
        assert_eq!(UpdateCode::DELETE.kind(), UpdateKind::Delete);
        assert_eq!(UpdateCode::EDIT.kind(), UpdateKind::Patch);
        assert_eq!(UpdateCode(99).kind(), UpdateKind::Patch);
    }

    #[test]
    fn update_code_reads_numeric_type_field() {
        assert_eq!(
            update_code(&json!({"type": 3, "postCode": "P1"})),
            Some(UpdateCode::DELETE)
        );
        assert_eq!(update_code(&json!({"postCode": "P1"})), None);
        assert_eq!(update_code(&json!({"type": "DELETE"})), None);
    }
}
