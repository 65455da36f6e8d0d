use thiserror::Error;

use crate::model::ResourceId;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("hub rpc '{method}' failed: {reason}")]
    Rpc { method: String, reason: String },
    #[error("hub connection is not established")]
    NotConnected,
    #[error("invalid hub url '{0}'")]
    InvalidUrl(String),
    #[error("authoritative fetch for '{id}' failed: {reason}")]
    Fetch { id: ResourceId, reason: String },
    #[error("engine is stopped")]
    Stopped,
}

impl SyncError {
    pub fn rpc(method: impl Into<String>, reason: impl ToString) -> Self {
        Self::Rpc {
            method: method.into(),
            reason: reason.to_string(),
        }
    }

    pub fn fetch(id: &ResourceId, reason: impl ToString) -> Self {
        Self::Fetch {
            id: id.clone(),
            reason: reason.to_string(),
        }
    }
}
