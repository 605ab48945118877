//! Note repository implementation
//!
//! Works against either side of the dual store. On the authoritative side the
//! `body` column of a private note holds ciphertext and `body_iv` its IV; on
//! the cache side bodies are always plaintext.

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT/OFFSET

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::models::{normalize_links, CategoryLink, Note};

/// A note row as stored, with its encryption IV when the body is ciphertext
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredNote {
    pub note: Note,
    pub body_iv: Option<String>,
}

/// A junction row by local keys: `(category_id, subcategory_id)`
pub type RawLink = (i64, Option<i64>);

const NOTE_COLUMNS: &str = "id, guid, title, description, body, body_iv, is_private, \
                            authored_at, created_at, updated_at, deleted_at";

/// `SQLite` note storage
pub struct SqliteNoteRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteNoteRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a note from a database row (categories are loaded separately)
    fn parse_note(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredNote> {
        Ok(StoredNote {
            note: Note {
                id: row.get(0)?,
                guid: row.get(1)?,
                title: row.get(2)?,
                description: row.get(3)?,
                body: row.get(4)?,
                is_private: row.get::<_, i32>(6)? != 0,
                authored_at: row.get(7)?,
                created_at: row.get(8)?,
                updated_at: row.get(9)?,
                deleted_at: row.get(10)?,
                categories: Vec::new(),
            },
            body_iv: row.get(5)?,
        })
    }

    /// Attach resolved and pending links, so a note keeps naming categories
    /// that have not been replicated yet
    fn with_links(&self, mut stored: StoredNote) -> Result<StoredNote> {
        let mut links = self.links(stored.note.id)?;
        links.extend(self.pending_links(stored.note.id)?);
        stored.note.categories = normalize_links(links);
        Ok(stored)
    }

    /// Get a note by local id, including tombstoned notes
    pub fn get(&self, id: i64) -> Result<Option<StoredNote>> {
        let stored = self
            .conn
            .query_row(
                &format!("SELECT {NOTE_COLUMNS} FROM notes WHERE id = ?"),
                params![id],
                Self::parse_note,
            )
            .optional()?;
        stored.map(|stored| self.with_links(stored)).transpose()
    }

    /// Get a note by GUID, including tombstoned notes
    pub fn get_by_guid(&self, guid: &str) -> Result<Option<StoredNote>> {
        let stored = self
            .conn
            .query_row(
                &format!("SELECT {NOTE_COLUMNS} FROM notes WHERE guid = ?"),
                params![guid],
                Self::parse_note,
            )
            .optional()?;
        stored.map(|stored| self.with_links(stored)).transpose()
    }

    /// List live notes, most recently updated first
    pub fn list(&self, limit: usize, offset: usize) -> Result<Vec<StoredNote>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {NOTE_COLUMNS} FROM notes
             WHERE deleted_at IS NULL
             ORDER BY updated_at DESC, id DESC
             LIMIT ? OFFSET ?"
        ))?;

        let notes = stmt
            .query_map(params![limit as i64, offset as i64], Self::parse_note)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        notes
            .into_iter()
            .map(|stored| self.with_links(stored))
            .collect()
    }

    /// Every note row, tombstones included, in key order
    pub fn list_all(&self) -> Result<Vec<StoredNote>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {NOTE_COLUMNS} FROM notes ORDER BY id"))?;
        let notes = stmt
            .query_map([], Self::parse_note)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(notes)
    }

    /// Insert a new row and return its local id (the `id` field is ignored)
    pub fn insert(&self, stored: &StoredNote) -> Result<i64> {
        let note = &stored.note;
        self.conn.execute(
            "INSERT INTO notes (guid, title, description, body, body_iv, is_private,
                                authored_at, created_at, updated_at, deleted_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                note.guid,
                note.title,
                note.description,
                note.body,
                stored.body_iv,
                i32::from(note.is_private),
                note.authored_at,
                note.created_at,
                note.updated_at,
                note.deleted_at,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Insert or overwrite a row keeping the given local id
    pub fn upsert_with_id(&self, stored: &StoredNote) -> Result<()> {
        let note = &stored.note;
        self.conn.execute(
            "INSERT INTO notes (id, guid, title, description, body, body_iv, is_private,
                                authored_at, created_at, updated_at, deleted_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                guid = excluded.guid,
                title = excluded.title,
                description = excluded.description,
                body = excluded.body,
                body_iv = excluded.body_iv,
                is_private = excluded.is_private,
                authored_at = excluded.authored_at,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                deleted_at = excluded.deleted_at",
            params![
                note.id,
                note.guid,
                note.title,
                note.description,
                note.body,
                stored.body_iv,
                i32::from(note.is_private),
                note.authored_at,
                note.created_at,
                note.updated_at,
                note.deleted_at,
            ],
        )?;
        Ok(())
    }

    /// Overwrite the mutable columns of an existing row
    pub fn update(&self, stored: &StoredNote) -> Result<bool> {
        let note = &stored.note;
        let rows = self.conn.execute(
            "UPDATE notes SET title = ?, description = ?, body = ?, body_iv = ?, is_private = ?,
                              authored_at = ?, updated_at = ?
             WHERE id = ?",
            params![
                note.title,
                note.description,
                note.body,
                stored.body_iv,
                i32::from(note.is_private),
                note.authored_at,
                note.updated_at,
                note.id,
            ],
        )?;
        Ok(rows > 0)
    }

    /// Set the tombstone. Returns `false` when the note was already deleted.
    pub fn soft_delete(&self, id: i64, now: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE notes SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
            params![now, id],
        )?;
        Ok(rows > 0)
    }

    /// Category links of a note, resolved to GUIDs
    pub fn links(&self, note_id: i64) -> Result<Vec<CategoryLink>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.guid, s.guid
             FROM note_categories nc
             JOIN categories c ON c.id = nc.category_id
             LEFT JOIN categories s ON s.id = nc.subcategory_id
             WHERE nc.note_id = ?",
        )?;
        let links = stmt
            .query_map(params![note_id], |row| {
                Ok(CategoryLink {
                    category_guid: row.get(0)?,
                    subcategory_guid: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(normalize_links(links))
    }

    /// Junction rows of a note by local keys
    pub fn raw_links(&self, note_id: i64) -> Result<Vec<RawLink>> {
        let mut stmt = self.conn.prepare(
            "SELECT category_id, subcategory_id FROM note_categories
             WHERE note_id = ? ORDER BY category_id, subcategory_id",
        )?;
        let links = stmt
            .query_map(params![note_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(links)
    }

    /// Replace all junction rows of a note
    pub fn set_raw_links(&self, note_id: i64, links: &[RawLink]) -> Result<()> {
        self.conn.execute(
            "DELETE FROM note_categories WHERE note_id = ?",
            params![note_id],
        )?;
        for (category_id, subcategory_id) in links {
            self.conn.execute(
                "INSERT OR IGNORE INTO note_categories (note_id, category_id, subcategory_id)
                 VALUES (?, ?, ?)",
                params![note_id, category_id, subcategory_id],
            )?;
        }
        Ok(())
    }

    /// Links of a note whose category has not been replicated locally yet
    pub fn pending_links(&self, note_id: i64) -> Result<Vec<CategoryLink>> {
        let mut stmt = self.conn.prepare(
            "SELECT category_guid, subcategory_guid FROM pending_note_links
             WHERE note_id = ? ORDER BY category_guid, subcategory_guid",
        )?;
        let links = stmt
            .query_map(params![note_id], |row| {
                Ok(CategoryLink {
                    category_guid: row.get(0)?,
                    subcategory_guid: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(links)
    }

    /// Replace the pending links of a note
    pub fn set_pending_links(&self, note_id: i64, links: &[CategoryLink]) -> Result<()> {
        self.conn.execute(
            "DELETE FROM pending_note_links WHERE note_id = ?",
            params![note_id],
        )?;
        for link in links {
            self.conn.execute(
                "INSERT OR IGNORE INTO pending_note_links (note_id, category_guid, subcategory_guid)
                 VALUES (?, ?, ?)",
                params![note_id, link.category_guid, link.subcategory_guid],
            )?;
        }
        Ok(())
    }

    /// Notes with a pending link naming `category_guid`
    pub fn note_ids_pending_on(&self, category_guid: &str) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT note_id FROM pending_note_links
             WHERE category_guid = ?1 OR subcategory_guid = ?1
             ORDER BY note_id",
        )?;
        let ids = stmt
            .query_map(params![category_guid], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    /// Notes linked to a category, either directly or as subcategory
    pub fn note_ids_linked_to(&self, category_id: i64) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT note_id FROM note_categories
             WHERE category_id = ?1 OR subcategory_id = ?1
             ORDER BY note_id",
        )?;
        let ids = stmt
            .query_map(params![category_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    /// Move every junction row from one category to another, dropping rows
    /// that would duplicate an existing link
    pub fn remap_category(&self, from_id: i64, to_id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE OR IGNORE note_categories SET category_id = ?2 WHERE category_id = ?1",
            params![from_id, to_id],
        )?;
        self.conn.execute(
            "UPDATE OR IGNORE note_categories SET subcategory_id = ?2 WHERE subcategory_id = ?1",
            params![from_id, to_id],
        )?;
        self.conn.execute(
            "DELETE FROM note_categories WHERE category_id = ?1 OR subcategory_id = ?1",
            params![from_id],
        )?;
        Ok(())
    }

    /// Sorted GUIDs of all live notes
    pub fn live_guids(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT guid FROM notes WHERE deleted_at IS NULL ORDER BY guid")?;
        let guids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(guids)
    }

    /// Delete every row (cache rebuild)
    pub fn clear(&self) -> Result<()> {
        self.conn.execute("DELETE FROM pending_note_links", [])?;
        self.conn.execute("DELETE FROM note_categories", [])?;
        self.conn.execute("DELETE FROM notes", [])?;
        Ok(())
    }
}
