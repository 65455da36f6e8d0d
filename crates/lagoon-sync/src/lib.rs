//! Real-time resource synchronization engine for the Lagoon client.
//!
//! One persistent hub connection feeds four independent read caches (feed,
//! search, profile, detail). Visibility drives debounced join/leave
//! subscriptions, inbound events are normalized to a canonical identity
//! set and applied as minimal patches, and a debounced refresh falls back
//! to an authoritative fetch when a patch is not enough.

pub mod cache;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod model;
pub mod notify;
pub mod optimistic;
pub mod patch;
pub mod protocol;
pub mod refresh;
pub mod registry;
pub mod resolve;
pub mod rooms;
pub mod transport;

pub use cache::{CacheSet, DetailCache, FeedCache, MultiCacheWriter, PostCache, ProfileCache,
    SearchCache};
pub use config::SyncConfig;
pub use connection::{ConnectionState, ConnectionSupervisor};
pub use engine::SyncEngine;
pub use error::SyncError;
pub use fetch::{ResourceFetcher, StaticFetcher};
pub use model::{Author, Hashtag, MediaFile, Post, PostPatch, ResourceId};
pub use notify::SyncNotification;
pub use optimistic::OptimisticMutations;
pub use protocol::{HubEvent, UpdateCode, UpdateKind};
pub use refresh::RefreshScheduler;
pub use registry::SubscriptionRegistry;
pub use resolve::IdentitySet;
pub use rooms::RoomSession;
pub use transport::{ConnectOptions, HubTransport, MockHub, TransportSignal, WebSocketHub};
