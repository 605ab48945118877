//! Persisted hub relationship state

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::models::PeerSyncState;
use crate::util::new_guid;

/// Which timestamp of a hub relationship to advance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMilestone {
    Pull,
    Push,
    Sync,
}

/// `SQLite` storage for `peer_sync_state`
pub struct SqlitePeerStateRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqlitePeerStateRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn get(&self, hub_url: &str) -> Result<Option<PeerSyncState>> {
        let state = self
            .conn
            .query_row(
                "SELECT id, hub_url, peer_id, auth_token, last_pull_at, last_push_at, last_sync_at
                 FROM peer_sync_state WHERE hub_url = ?",
                params![hub_url],
                |row| {
                    Ok(PeerSyncState {
                        id: row.get(0)?,
                        hub_url: row.get(1)?,
                        peer_id: row.get(2)?,
                        auth_token: row.get(3)?,
                        last_pull_at: row.get(4)?,
                        last_push_at: row.get(5)?,
                        last_sync_at: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(state)
    }

    /// Load the state for a hub, generating this peer's identity on first use
    pub fn load_or_create(&self, hub_url: &str) -> Result<PeerSyncState> {
        if let Some(state) = self.get(hub_url)? {
            return Ok(state);
        }

        let peer_id = new_guid();
        self.conn.execute(
            "INSERT INTO peer_sync_state (hub_url, peer_id) VALUES (?, ?)",
            params![hub_url, peer_id],
        )?;
        tracing::info!(hub_url, peer_id = %peer_id, "Generated peer identity for hub");

        Ok(PeerSyncState {
            id: self.conn.last_insert_rowid(),
            hub_url: hub_url.to_string(),
            peer_id,
            auth_token: None,
            last_pull_at: None,
            last_push_at: None,
            last_sync_at: None,
        })
    }

    /// Replace (or clear) the cached auth token
    pub fn save_token(&self, hub_url: &str, token: Option<&str>) -> Result<()> {
        self.conn.execute(
            "UPDATE peer_sync_state SET auth_token = ? WHERE hub_url = ?",
            params![token, hub_url],
        )?;
        Ok(())
    }

    /// Advance one of the relationship timestamps
    pub fn touch(&self, hub_url: &str, milestone: SyncMilestone, at: i64) -> Result<()> {
        let column = match milestone {
            SyncMilestone::Pull => "last_pull_at",
            SyncMilestone::Push => "last_push_at",
            SyncMilestone::Sync => "last_sync_at",
        };
        self.conn.execute(
            &format!("UPDATE peer_sync_state SET {column} = ? WHERE hub_url = ?"),
            params![at, hub_url],
        )?;
        Ok(())
    }
}
