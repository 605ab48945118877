//! Sync conflict audit log

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use rusqlite::{params, Connection};

use crate::error::Result;
use crate::models::{EntityType, SyncConflict};

/// `SQLite` storage for the write-only conflict audit trail
pub struct SqliteConflictRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteConflictRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Append an audit row
    pub fn record(
        &self,
        entity_type: EntityType,
        entity_guid: &str,
        local_change: &str,
        remote_change: &str,
        resolution: &str,
        created_at: i64,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO sync_conflicts (entity_type, entity_guid, local_change, remote_change, resolution, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                entity_type.as_str(),
                entity_guid,
                local_change,
                remote_change,
                resolution,
                created_at,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// List recent conflicts, newest first
    pub fn list(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, entity_type, entity_guid, local_change, remote_change, resolution, created_at
             FROM sync_conflicts
             ORDER BY created_at DESC, id DESC
             LIMIT ?",
        )?;

        let conflicts = stmt
            .query_map(params![limit as i64], |row| {
                let entity_type: String = row.get(1)?;
                let entity_type = entity_type.parse::<EntityType>().map_err(|error| {
                    rusqlite::Error::FromSqlConversionFailure(
                        1,
                        rusqlite::types::Type::Text,
                        error.into(),
                    )
                })?;
                Ok(SyncConflict {
                    id: row.get(0)?,
                    entity_type,
                    entity_guid: row.get(2)?,
                    local_change: row.get(3)?,
                    remote_change: row.get(4)?,
                    resolution: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(conflicts)
    }
}
