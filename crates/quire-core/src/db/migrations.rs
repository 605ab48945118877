//! Database migrations

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Entity tables shared by the authoritative store and the read cache. The
/// cache is filled with explicit primary keys copied from the authoritative
/// store, so both sides must agree on these definitions.
const ENTITY_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS notes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        guid TEXT NOT NULL UNIQUE,
        title TEXT NOT NULL,
        description TEXT,
        body TEXT NOT NULL DEFAULT '',
        body_iv TEXT,
        is_private INTEGER NOT NULL DEFAULT 0,
        authored_at INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        deleted_at INTEGER
    );
    CREATE INDEX IF NOT EXISTS idx_notes_updated ON notes(updated_at DESC);
    CREATE INDEX IF NOT EXISTS idx_notes_deleted ON notes(deleted_at);

    CREATE TABLE IF NOT EXISTS categories (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        guid TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        description TEXT,
        color TEXT,
        parent_id INTEGER REFERENCES categories(id),
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        deleted_at INTEGER
    );
    CREATE INDEX IF NOT EXISTS idx_categories_name ON categories(name COLLATE NOCASE);

    CREATE TABLE IF NOT EXISTS note_categories (
        note_id INTEGER NOT NULL REFERENCES notes(id) ON DELETE CASCADE,
        category_id INTEGER NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
        subcategory_id INTEGER REFERENCES categories(id) ON DELETE CASCADE
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_note_categories_unique
        ON note_categories(note_id, category_id, IFNULL(subcategory_id, 0));
    CREATE INDEX IF NOT EXISTS idx_note_categories_category ON note_categories(category_id);
";

/// Note links whose category has not been replicated yet. Kept on both
/// sides of the dual store.
const PENDING_LINKS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS pending_note_links (
        note_id INTEGER NOT NULL REFERENCES notes(id) ON DELETE CASCADE,
        category_guid TEXT NOT NULL,
        subcategory_guid TEXT
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_pending_note_links_unique
        ON pending_note_links(note_id, category_guid, IFNULL(subcategory_guid, ''));
    CREATE INDEX IF NOT EXISTS idx_pending_note_links_category ON pending_note_links(category_guid);
    CREATE INDEX IF NOT EXISTS idx_pending_note_links_subcategory
        ON pending_note_links(subcategory_guid);
";

/// Run all pending migrations on the authoritative store
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Create the entity tables on a fresh read cache
pub fn create_cache_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(ENTITY_SCHEMA)?;
    conn.execute_batch(PENDING_LINKS_SCHEMA)?;
    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Migration to version 1: entities, change log, sync bookkeeping
fn migrate_v1(conn: &Connection) -> Result<()> {
    let sync_schema = "
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS note_fragments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            bitmask INTEGER NOT NULL,
            title TEXT,
            description TEXT,
            body TEXT,
            body_is_diff INTEGER NOT NULL DEFAULT 0,
            is_private INTEGER,
            categories TEXT
        );
        CREATE TABLE IF NOT EXISTS note_changes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            guid TEXT NOT NULL UNIQUE,
            entity_guid TEXT NOT NULL,
            operation INTEGER NOT NULL,
            fragment_id INTEGER REFERENCES note_fragments(id),
            author TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_note_changes_entity ON note_changes(entity_guid);
        CREATE INDEX IF NOT EXISTS idx_note_changes_created ON note_changes(created_at);
        CREATE TABLE IF NOT EXISTS note_change_sync_peers (
            change_id INTEGER NOT NULL REFERENCES note_changes(id),
            peer_id TEXT NOT NULL,
            synced_at INTEGER NOT NULL,
            PRIMARY KEY (change_id, peer_id)
        );

        CREATE TABLE IF NOT EXISTS category_fragments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            bitmask INTEGER NOT NULL,
            name TEXT,
            description TEXT,
            color TEXT,
            parent_guid TEXT
        );
        CREATE TABLE IF NOT EXISTS category_changes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            guid TEXT NOT NULL UNIQUE,
            entity_guid TEXT NOT NULL,
            operation INTEGER NOT NULL,
            fragment_id INTEGER REFERENCES category_fragments(id),
            author TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_category_changes_entity ON category_changes(entity_guid);
        CREATE INDEX IF NOT EXISTS idx_category_changes_created ON category_changes(created_at);
        CREATE TABLE IF NOT EXISTS category_change_sync_peers (
            change_id INTEGER NOT NULL REFERENCES category_changes(id),
            peer_id TEXT NOT NULL,
            synced_at INTEGER NOT NULL,
            PRIMARY KEY (change_id, peer_id)
        );

        CREATE TABLE IF NOT EXISTS sync_conflicts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_type TEXT NOT NULL,
            entity_guid TEXT NOT NULL,
            local_change TEXT NOT NULL,
            remote_change TEXT NOT NULL,
            resolution TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_sync_conflicts_created ON sync_conflicts(created_at DESC);

        CREATE TABLE IF NOT EXISTS peer_sync_state (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            hub_url TEXT NOT NULL UNIQUE,
            peer_id TEXT NOT NULL,
            auth_token TEXT,
            last_pull_at INTEGER,
            last_push_at INTEGER,
            last_sync_at INTEGER
        );

        INSERT INTO schema_version (version) VALUES (1);
    ";

    conn.execute_batch(&format!("BEGIN;{ENTITY_SCHEMA}{sync_schema}COMMIT;"))
        .inspect_err(|_| {
            conn.execute_batch("ROLLBACK").ok();
        })?;

    tracing::info!("Migrated database to version 1");
    Ok(())
}

/// Migration to version 2: note links waiting for their category
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(&format!(
        "BEGIN;{PENDING_LINKS_SCHEMA}INSERT INTO schema_version (version) VALUES (2);COMMIT;"
    ))
    .inspect_err(|_| {
        conn.execute_batch("ROLLBACK").ok();
    })?;

    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?)",
            [name],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_migrations() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
        for table in [
            "notes",
            "categories",
            "note_categories",
            "note_changes",
            "note_fragments",
            "note_change_sync_peers",
            "category_changes",
            "category_fragments",
            "category_change_sync_peers",
            "sync_conflicts",
            "peer_sync_state",
            "pending_note_links",
        ] {
            assert!(table_exists(&conn, table), "missing table {table}");
        }
    }

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap(); // Should not fail

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }
}
