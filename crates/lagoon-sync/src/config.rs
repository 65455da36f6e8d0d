use std::time::Duration;

/// Tuning knobs for one engine instance. Everything here has a sensible
/// default; the binary overrides from flags/env.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Hub endpoint, e.g. `wss://host/chatHub`.
    pub hub_url: String,
    pub auth_token: String,
    pub device_id: String,

    /// How long a resource must stay visible before we join it.
    pub join_settle: Duration,
    /// How long a resource must stay invisible before we leave it.
    /// Shorter than `join_settle` so scroll flicker never drops a join.
    pub leave_settle: Duration,
    /// Hard cap on concurrently joined resources; the oldest join is
    /// evicted when a new resource needs the slot.
    pub max_joined: usize,

    pub keep_alive: Duration,
    /// Server-side inactivity timeout. Expiry is a disconnect, not an error.
    pub server_timeout: Duration,
    pub reconnect_base: Duration,
    pub reconnect_cap: Duration,
    /// Backoff attempts before giving up until the next online/foreground
    /// signal.
    pub max_reconnect_attempts: u32,

    /// Debounce window for scheduled full refreshes.
    pub refresh_delay: Duration,
    /// How long an optimistic patch shields a resource from server echoes.
    pub overlay_ttl: Duration,

    pub room_ping_interval: Duration,
    pub typing_idle: Duration,
    pub typing_hard: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            hub_url: "ws://127.0.0.1:8080/hub".into(),
            auth_token: String::new(),
            device_id: "dev".into(),
            join_settle: Duration::from_millis(400),
            leave_settle: Duration::from_millis(250),
            max_joined: 24,
            keep_alive: Duration::from_secs(15),
            server_timeout: Duration::from_secs(30),
            reconnect_base: Duration::from_secs(1),
            reconnect_cap: Duration::from_secs(30),
            max_reconnect_attempts: 5,
            refresh_delay: Duration::from_millis(350),
            overlay_ttl: Duration::from_secs(5),
            room_ping_interval: Duration::from_secs(20),
            typing_idle: Duration::from_secs(2),
            typing_hard: Duration::from_secs(20),
        }
    }
}

impl SyncConfig {
    pub fn connect_options(&self) -> crate::transport::ConnectOptions {
        crate::transport::ConnectOptions {
            auth_token: self.auth_token.clone(),
            device_id: self.device_id.clone(),
            keep_alive: self.keep_alive,
            server_timeout: self.server_timeout,
        }
    }
}
