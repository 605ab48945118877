//! Change log repository
//!
//! Fragments and changes are append-only. Delivery to a peer is recorded as a
//! row in the per-entity `*_change_sync_peers` table; a change without a row
//! for a peer is unsent to that peer.

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::models::{
    CategoryFragment, ChangeRecord, EntityType, Fragment, NoteFragment, Operation,
};

/// Table names backing one entity's change log
struct ChangeTables {
    changes: &'static str,
    markers: &'static str,
}

const fn tables(entity: EntityType) -> ChangeTables {
    match entity {
        EntityType::Note => ChangeTables {
            changes: "note_changes",
            markers: "note_change_sync_peers",
        },
        EntityType::Category => ChangeTables {
            changes: "category_changes",
            markers: "category_change_sync_peers",
        },
    }
}

/// A change row before insertion
#[derive(Debug, Clone)]
pub struct NewChange<'a> {
    pub guid: &'a str,
    pub entity_guid: &'a str,
    pub operation: Operation,
    pub fragment_id: Option<i64>,
    pub author: &'a str,
    pub created_at: i64,
}

/// `SQLite` change log storage
pub struct SqliteChangeRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteChangeRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_change(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChangeRecord> {
        let code: u8 = row.get(3)?;
        let operation = Operation::try_from(code).map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Integer,
                error.into(),
            )
        })?;
        Ok(ChangeRecord {
            id: row.get(0)?,
            guid: row.get(1)?,
            entity_guid: row.get(2)?,
            operation,
            fragment_id: row.get(4)?,
            author: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    /// Store a note fragment and return its id
    pub fn insert_note_fragment(&self, fragment: &NoteFragment) -> Result<i64> {
        let categories = fragment
            .categories
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.conn.execute(
            "INSERT INTO note_fragments (bitmask, title, description, body, body_is_diff, is_private, categories)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                fragment.bitmask,
                fragment.title,
                fragment.description,
                fragment.body,
                i32::from(fragment.body_is_diff),
                fragment.is_private.map(i32::from),
                categories,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Store a category fragment and return its id
    pub fn insert_category_fragment(&self, fragment: &CategoryFragment) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO category_fragments (bitmask, name, description, color, parent_guid)
             VALUES (?, ?, ?, ?, ?)",
            params![
                fragment.bitmask,
                fragment.name,
                fragment.description,
                fragment.color,
                fragment.parent_guid,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Load a note fragment by id
    pub fn note_fragment(&self, id: i64) -> Result<Option<NoteFragment>> {
        let row = self
            .conn
            .query_row(
                "SELECT bitmask, title, description, body, body_is_diff, is_private, categories
                 FROM note_fragments WHERE id = ?",
                params![id],
                |row| {
                    Ok((
                        NoteFragment {
                            bitmask: row.get(0)?,
                            title: row.get(1)?,
                            description: row.get(2)?,
                            body: row.get(3)?,
                            body_is_diff: row.get::<_, i32>(4)? != 0,
                            is_private: row.get::<_, Option<i32>>(5)?.map(|flag| flag != 0),
                            categories: None,
                        },
                        row.get::<_, Option<String>>(6)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(mut fragment, categories)| {
            fragment.categories = categories
                .map(|json| serde_json::from_str(&json))
                .transpose()?;
            Ok(fragment)
        })
        .transpose()
    }

    /// Load a category fragment by id
    pub fn category_fragment(&self, id: i64) -> Result<Option<CategoryFragment>> {
        let fragment = self
            .conn
            .query_row(
                "SELECT bitmask, name, description, color, parent_guid
                 FROM category_fragments WHERE id = ?",
                params![id],
                |row| {
                    Ok(CategoryFragment {
                        bitmask: row.get(0)?,
                        name: row.get(1)?,
                        description: row.get(2)?,
                        color: row.get(3)?,
                        parent_guid: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(fragment)
    }

    /// Append a change row and return its id
    pub fn insert_change(&self, entity: EntityType, change: &NewChange<'_>) -> Result<i64> {
        let tables = tables(entity);
        self.conn.execute(
            &format!(
                "INSERT INTO {} (guid, entity_guid, operation, fragment_id, author, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
                tables.changes
            ),
            params![
                change.guid,
                change.entity_guid,
                change.operation.code(),
                change.fragment_id,
                change.author,
                change.created_at,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Whether a change with this GUID exists in either change table
    pub fn change_exists(&self, guid: &str) -> Result<bool> {
        let exists = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM note_changes WHERE guid = ?1)
                 OR EXISTS(SELECT 1 FROM category_changes WHERE guid = ?1)",
            params![guid],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Load a change by GUID
    pub fn get_by_guid(&self, entity: EntityType, guid: &str) -> Result<Option<ChangeRecord>> {
        let change = self
            .conn
            .query_row(
                &format!(
                    "SELECT id, guid, entity_guid, operation, fragment_id, author, created_at
                     FROM {} WHERE guid = ?",
                    tables(entity).changes
                ),
                params![guid],
                Self::parse_change,
            )
            .optional()?;
        Ok(change)
    }

    /// Changes of an entity, oldest first
    pub fn for_entity(&self, entity: EntityType, entity_guid: &str) -> Result<Vec<ChangeRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, guid, entity_guid, operation, fragment_id, author, created_at
             FROM {} WHERE entity_guid = ? ORDER BY created_at, id",
            tables(entity).changes
        ))?;
        let changes = stmt
            .query_map(params![entity_guid], Self::parse_change)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(changes)
    }

    /// Up to `limit` changes not yet delivered to `peer_id`, oldest first
    pub fn unsent(&self, entity: EntityType, peer_id: &str, limit: usize) -> Result<Vec<ChangeRecord>> {
        let tables = tables(entity);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT c.id, c.guid, c.entity_guid, c.operation, c.fragment_id, c.author, c.created_at
             FROM {changes} c
             WHERE NOT EXISTS (
                 SELECT 1 FROM {markers} m WHERE m.change_id = c.id AND m.peer_id = ?
             )
             ORDER BY c.created_at, c.id
             LIMIT ?",
            changes = tables.changes,
            markers = tables.markers,
        ))?;
        let changes = stmt
            .query_map(params![peer_id, limit as i64], Self::parse_change)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(changes)
    }

    /// Locally authored changes of an entity not yet delivered to `peer_id`,
    /// newest first
    pub fn pending_local(
        &self,
        entity: EntityType,
        entity_guid: &str,
        peer_id: &str,
    ) -> Result<Vec<ChangeRecord>> {
        let tables = tables(entity);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT c.id, c.guid, c.entity_guid, c.operation, c.fragment_id, c.author, c.created_at
             FROM {changes} c
             WHERE c.entity_guid = ? AND c.operation != ?
               AND NOT EXISTS (
                   SELECT 1 FROM {markers} m WHERE m.change_id = c.id AND m.peer_id = ?
               )
             ORDER BY c.created_at DESC, c.id DESC",
            changes = tables.changes,
            markers = tables.markers,
        ))?;
        let changes = stmt
            .query_map(
                params![entity_guid, Operation::Sync.code(), peer_id],
                Self::parse_change,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(changes)
    }

    /// Record that a change was delivered to `peer_id`. Re-marking is a no-op.
    pub fn mark_synced(
        &self,
        entity: EntityType,
        change_id: i64,
        peer_id: &str,
        synced_at: i64,
    ) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {} (change_id, peer_id, synced_at) VALUES (?, ?, ?)",
                tables(entity).markers
            ),
            params![change_id, peer_id, synced_at],
        )?;
        Ok(())
    }

    /// Mark a change as delivered by GUID. Returns `false` for unknown GUIDs.
    pub fn mark_synced_by_guid(
        &self,
        entity: EntityType,
        guid: &str,
        peer_id: &str,
        synced_at: i64,
    ) -> Result<bool> {
        let Some(change) = self.get_by_guid(entity, guid)? else {
            return Ok(false);
        };
        self.mark_synced(entity, change.id, peer_id, synced_at)?;
        Ok(true)
    }

    /// Mark every still-pending change of an entity as delivered to `peer_id`
    pub fn supersede_pending(
        &self,
        entity: EntityType,
        entity_guid: &str,
        peer_id: &str,
        synced_at: i64,
    ) -> Result<usize> {
        let tables = tables(entity);
        let rows = self.conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {markers} (change_id, peer_id, synced_at)
                 SELECT id, ?2, ?3 FROM {changes} WHERE entity_guid = ?1",
                changes = tables.changes,
                markers = tables.markers,
            ),
            params![entity_guid, peer_id, synced_at],
        )?;
        Ok(rows)
    }

    /// Load the fragment referenced by a change, tagged by entity kind
    pub fn fragment_for(
        &self,
        entity: EntityType,
        change: &ChangeRecord,
    ) -> Result<Option<Fragment>> {
        let Some(fragment_id) = change.fragment_id else {
            return Ok(None);
        };
        let fragment = match entity {
            EntityType::Note => self.note_fragment(fragment_id)?.map(Fragment::Note),
            EntityType::Category => self.category_fragment(fragment_id)?.map(Fragment::Category),
        };
        fragment
            .ok_or_else(|| {
                Error::Database(format!(
                    "change {} references missing fragment {fragment_id}",
                    change.guid
                ))
            })
            .map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::CategoryLink;

    fn change<'a>(guid: &'a str, entity_guid: &'a str, operation: Operation, at: i64) -> NewChange<'a> {
        NewChange {
            guid,
            entity_guid,
            operation,
            fragment_id: None,
            author: "tester",
            created_at: at,
        }
    }

    #[test]
    fn test_note_fragment_round_trips_categories() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteChangeRepository::new(db.connection());

        let fragment = NoteFragment {
            bitmask: NoteFragment::CATEGORIES | NoteFragment::IS_PRIVATE,
            is_private: Some(true),
            categories: Some(vec![CategoryLink::new("c1")]),
            ..NoteFragment::default()
        };
        let id = repo.insert_note_fragment(&fragment).unwrap();
        assert_eq!(repo.note_fragment(id).unwrap(), Some(fragment));
    }

    #[test]
    fn test_unsent_is_anti_join_on_markers() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteChangeRepository::new(db.connection());

        let first = repo
            .insert_change(EntityType::Note, &change("c1", "n1", Operation::Create, 1))
            .unwrap();
        repo.insert_change(EntityType::Note, &change("c2", "n1", Operation::Update, 2))
            .unwrap();

        repo.mark_synced(EntityType::Note, first, "peer-a", 5).unwrap();
        repo.mark_synced(EntityType::Note, first, "peer-a", 6).unwrap();

        let for_a = repo.unsent(EntityType::Note, "peer-a", 10).unwrap();
        assert_eq!(for_a.len(), 1);
        assert_eq!(for_a[0].guid, "c2");

        let for_b = repo.unsent(EntityType::Note, "peer-b", 10).unwrap();
        assert_eq!(for_b.len(), 2);
        assert_eq!(repo.unsent(EntityType::Note, "peer-b", 1).unwrap().len(), 1);
    }

    #[test]
    fn test_pending_local_excludes_sync_changes() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteChangeRepository::new(db.connection());

        repo.insert_change(EntityType::Category, &change("c1", "cat", Operation::Sync, 1))
            .unwrap();
        repo.insert_change(EntityType::Category, &change("c2", "cat", Operation::Update, 2))
            .unwrap();
        repo.insert_change(EntityType::Category, &change("c3", "cat", Operation::Update, 3))
            .unwrap();

        let pending = repo
            .pending_local(EntityType::Category, "cat", "hub")
            .unwrap();
        let guids: Vec<_> = pending.iter().map(|c| c.guid.as_str()).collect();
        assert_eq!(guids, vec!["c3", "c2"]);

        repo.supersede_pending(EntityType::Category, "cat", "hub", 9)
            .unwrap();
        assert!(repo
            .pending_local(EntityType::Category, "cat", "hub")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_change_exists_checks_both_tables() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteChangeRepository::new(db.connection());

        repo.insert_change(EntityType::Category, &change("g1", "cat", Operation::Create, 1))
            .unwrap();
        assert!(repo.change_exists("g1").unwrap());
        assert!(!repo.change_exists("g2").unwrap());
    }
}
