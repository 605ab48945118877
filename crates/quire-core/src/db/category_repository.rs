//! Category repository implementation

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::models::Category;

/// A category row with its raw parent key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCategory {
    pub category: Category,
    pub parent_id: Option<i64>,
}

const CATEGORY_COLUMNS: &str = "c.id, c.guid, c.name, c.description, c.color, p.guid, c.parent_id, \
                                c.created_at, c.updated_at, c.deleted_at";

/// `SQLite` category storage
pub struct SqliteCategoryRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteCategoryRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_category(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredCategory> {
        Ok(StoredCategory {
            category: Category {
                id: row.get(0)?,
                guid: row.get(1)?,
                name: row.get(2)?,
                description: row.get(3)?,
                color: row.get(4)?,
                parent_guid: row.get(5)?,
                created_at: row.get(7)?,
                updated_at: row.get(8)?,
                deleted_at: row.get(9)?,
            },
            parent_id: row.get(6)?,
        })
    }

    fn select(&self, filter: &str, value: impl rusqlite::ToSql) -> Result<Option<StoredCategory>> {
        let category = self
            .conn
            .query_row(
                &format!(
                    "SELECT {CATEGORY_COLUMNS} FROM categories c
                     LEFT JOIN categories p ON p.id = c.parent_id
                     WHERE {filter}"
                ),
                params![value],
                Self::parse_category,
            )
            .optional()?;
        Ok(category)
    }

    /// Get a category by local id, including tombstoned categories
    pub fn get(&self, id: i64) -> Result<Option<StoredCategory>> {
        self.select("c.id = ?", id)
    }

    /// Get a category by GUID, including tombstoned categories
    pub fn get_by_guid(&self, guid: &str) -> Result<Option<StoredCategory>> {
        self.select("c.guid = ?", guid)
    }

    /// Resolve a GUID to the local id of a category row
    pub fn id_for_guid(&self, guid: &str) -> Result<Option<i64>> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM categories WHERE guid = ?",
                params![guid],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Find a live category by name, ignoring case
    pub fn find_live_by_name(&self, name: &str) -> Result<Option<StoredCategory>> {
        self.select(
            "c.name = ? COLLATE NOCASE AND c.deleted_at IS NULL ORDER BY c.id LIMIT 1",
            name,
        )
    }

    /// List live categories by name
    pub fn list(&self) -> Result<Vec<StoredCategory>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CATEGORY_COLUMNS} FROM categories c
             LEFT JOIN categories p ON p.id = c.parent_id
             WHERE c.deleted_at IS NULL
             ORDER BY c.name COLLATE NOCASE, c.id"
        ))?;
        let categories = stmt
            .query_map([], Self::parse_category)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(categories)
    }

    /// Every category row, tombstones included, in key order
    pub fn list_all(&self) -> Result<Vec<StoredCategory>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CATEGORY_COLUMNS} FROM categories c
             LEFT JOIN categories p ON p.id = c.parent_id
             ORDER BY c.id"
        ))?;
        let categories = stmt
            .query_map([], Self::parse_category)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(categories)
    }

    /// Insert a new row and return its local id (the `id` field is ignored)
    pub fn insert(&self, stored: &StoredCategory) -> Result<i64> {
        let category = &stored.category;
        self.conn.execute(
            "INSERT INTO categories (guid, name, description, color, parent_id,
                                     created_at, updated_at, deleted_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                category.guid,
                category.name,
                category.description,
                category.color,
                stored.parent_id,
                category.created_at,
                category.updated_at,
                category.deleted_at,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Insert or overwrite a row keeping the given local id
    pub fn upsert_with_id(&self, stored: &StoredCategory) -> Result<()> {
        let category = &stored.category;
        self.conn.execute(
            "INSERT INTO categories (id, guid, name, description, color, parent_id,
                                     created_at, updated_at, deleted_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                guid = excluded.guid,
                name = excluded.name,
                description = excluded.description,
                color = excluded.color,
                parent_id = excluded.parent_id,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                deleted_at = excluded.deleted_at",
            params![
                category.id,
                category.guid,
                category.name,
                category.description,
                category.color,
                stored.parent_id,
                category.created_at,
                category.updated_at,
                category.deleted_at,
            ],
        )?;
        Ok(())
    }

    /// Overwrite the mutable columns of an existing row
    pub fn update(&self, stored: &StoredCategory) -> Result<bool> {
        let category = &stored.category;
        let rows = self.conn.execute(
            "UPDATE categories SET name = ?, description = ?, color = ?, parent_id = ?, updated_at = ?
             WHERE id = ?",
            params![
                category.name,
                category.description,
                category.color,
                stored.parent_id,
                category.updated_at,
                category.id,
            ],
        )?;
        Ok(rows > 0)
    }

    /// Set the tombstone. Returns `false` when the category was already deleted.
    pub fn soft_delete(&self, id: i64, now: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE categories SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
            params![now, id],
        )?;
        Ok(rows > 0)
    }

    /// Move the subcategories of one category under another
    pub fn reparent_children(&self, from_id: i64, to_id: i64) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM categories WHERE parent_id = ? ORDER BY id")?;
        let children = stmt
            .query_map(params![from_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        self.conn.execute(
            "UPDATE categories SET parent_id = ?2 WHERE parent_id = ?1",
            params![from_id, to_id],
        )?;
        Ok(children)
    }

    /// Sorted GUIDs of all live categories
    pub fn live_guids(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT guid FROM categories WHERE deleted_at IS NULL ORDER BY guid")?;
        let guids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(guids)
    }

    /// Delete every row (cache rebuild)
    pub fn clear(&self) -> Result<()> {
        self.conn.execute("DELETE FROM categories", [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn stored(guid: &str, name: &str, parent_id: Option<i64>) -> StoredCategory {
        StoredCategory {
            category: Category {
                id: 0,
                guid: guid.to_string(),
                name: name.to_string(),
                description: None,
                color: None,
                parent_guid: None,
                created_at: 1,
                updated_at: 1,
                deleted_at: None,
            },
            parent_id,
        }
    }

    #[test]
    fn test_parent_guid_is_resolved() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteCategoryRepository::new(db.connection());

        let parent = repo.insert(&stored("p", "Work", None)).unwrap();
        let child = repo.insert(&stored("c", "Meetings", Some(parent))).unwrap();

        let fetched = repo.get(child).unwrap().unwrap();
        assert_eq!(fetched.category.parent_guid.as_deref(), Some("p"));
        assert_eq!(fetched.parent_id, Some(parent));
    }

    #[test]
    fn test_find_live_by_name_ignores_case_and_tombstones() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteCategoryRepository::new(db.connection());

        let dead = repo.insert(&stored("a", "Work", None)).unwrap();
        repo.soft_delete(dead, 5).unwrap();
        assert!(repo.find_live_by_name("work").unwrap().is_none());

        repo.insert(&stored("b", "Work", None)).unwrap();
        let found = repo.find_live_by_name("WORK").unwrap().unwrap();
        assert_eq!(found.category.guid, "b");
    }

    #[test]
    fn test_reparent_children() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteCategoryRepository::new(db.connection());

        let old = repo.insert(&stored("old", "Old", None)).unwrap();
        let new = repo.insert(&stored("new", "New", None)).unwrap();
        let child = repo.insert(&stored("child", "Child", Some(old))).unwrap();

        assert_eq!(repo.reparent_children(old, new).unwrap(), vec![child]);
        assert_eq!(repo.get(child).unwrap().unwrap().parent_id, Some(new));
    }
}
