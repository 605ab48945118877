//! Shared sync state types.

use serde::Serialize;

/// Sync state reported by the background client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// No cycle has completed yet, or the hub was unreachable.
    Offline,
    Syncing,
    Synced,
    Error,
}
