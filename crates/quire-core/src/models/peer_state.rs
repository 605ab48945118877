//! Persisted per-hub sync state

use std::fmt;

/// One row per hub relationship
#[derive(Clone, PartialEq, Eq)]
pub struct PeerSyncState {
    pub id: i64,
    /// Normalized hub base URL; also the key used for this hub's sent-markers
    pub hub_url: String,
    /// Locally generated identity presented to the hub, stable across restarts
    pub peer_id: String,
    /// Cached opaque auth token
    pub auth_token: Option<String>,
    pub last_pull_at: Option<i64>,
    pub last_push_at: Option<i64>,
    pub last_sync_at: Option<i64>,
}

impl fmt::Debug for PeerSyncState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("PeerSyncState")
            .field("id", &self.id)
            .field("hub_url", &self.hub_url)
            .field("peer_id", &self.peer_id)
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("last_pull_at", &self.last_pull_at)
            .field("last_push_at", &self.last_push_at)
            .field("last_sync_at", &self.last_sync_at)
            .finish()
    }
}
