use serde_json::Value;

use crate::connection::ConnectionState;
use crate::model::ResourceId;

/// User-facing signals the engine surfaces. The UI layer renders these;
/// the engine never blocks on them.
#[derive(Debug, Clone)]
pub enum SyncNotification {
    /// Connectivity changed; lets the UI show a degraded indicator.
    Connection(ConnectionState),
    /// An optimistic mutation failed and was rolled back.
    MutationFailed { id: ResourceId, reason: String },
    FriendRequest(Value),
    UnreadCount(Value),
    Typing(Value),
}

pub(crate) type NotifySender = tokio::sync::mpsc::UnboundedSender<SyncNotification>;

pub(crate) fn emit(sender: &NotifySender, notification: SyncNotification) {
    // Receiver gone just means nobody is rendering; drop silently.
    let _ = sender.send(notification);
}
