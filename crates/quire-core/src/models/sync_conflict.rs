//! Sync conflict model

use serde::{Deserialize, Serialize};

use super::change::EntityType;

/// Audit record of a resolved sync conflict. Written by the resolver, never
/// read back by the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict row identifier
    pub id: i64,
    pub entity_type: EntityType,
    pub entity_guid: String,
    /// Serialized envelope of the local side
    pub local_change: String,
    /// Serialized envelope of the remote side
    pub remote_change: String,
    /// Resolution label (e.g. `lww_remote`)
    pub resolution: String,
    /// Resolution timestamp (Unix ms)
    pub created_at: i64,
}
