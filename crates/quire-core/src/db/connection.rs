//! Database connection management

use std::path::Path;

use rusqlite::Connection;

use super::migrations;
use crate::error::Result;

/// Which schema a connection carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreRole {
    /// Durable store: entities, change log, sync markers, audit, peer state
    Authoritative,
    /// Derived read cache: entity tables only
    Cache,
}

/// Database wrapper for `SQLite` connections
pub struct Database {
    conn: Connection,
    role: StoreRole,
}

impl Database {
    /// Open the authoritative database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let database = Self {
            conn,
            role: StoreRole::Authoritative,
        };
        database.configure()?;
        database.migrate()?;
        Ok(database)
    }

    /// Open an in-memory authoritative database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        let database = Self {
            conn: Connection::open_in_memory()?,
            role: StoreRole::Authoritative,
        };
        database.configure()?;
        database.migrate()?;
        Ok(database)
    }

    /// Open an empty in-memory read cache
    pub fn open_cache() -> Result<Self> {
        let database = Self {
            conn: Connection::open_in_memory()?,
            role: StoreRole::Cache,
        };
        database.configure()?;
        database.migrate()?;
        Ok(database)
    }

    /// Configure `SQLite` for optimal performance
    fn configure(&self) -> Result<()> {
        if self.role == StoreRole::Authoritative {
            // WAL is unavailable for in-memory databases; ignore the result there
            self.conn
                .pragma_update(None, "journal_mode", "WAL")
                .ok();
            self.conn.pragma_update(None, "synchronous", "NORMAL")?;
            self.conn.pragma_update(None, "foreign_keys", "ON")?;
        }
        // The cache mirrors rows one at a time and may briefly hold a junction
        // row before its category, so it leaves foreign keys off.
        self.conn.pragma_update(None, "cache_size", 10000)?;
        Ok(())
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        match self.role {
            StoreRole::Authoritative => migrations::run(&self.conn),
            StoreRole::Cache => migrations::create_cache_schema(&self.conn),
        }
    }

    /// Which schema this database carries
    pub const fn role(&self) -> StoreRole {
        self.role
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Get a mutable reference to the underlying connection (for transactions)
    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.role(), StoreRole::Authoritative);
    }

    #[test]
    fn test_cache_has_no_change_log() {
        let db = Database::open_cache().unwrap();
        let exists: bool = db
            .connection()
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'note_changes')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(!exists);
    }

    #[test]
    fn test_open_file_creates_schema() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("quire.db");
        {
            Database::open(&path).unwrap();
        }
        assert!(path.exists());
        // Reopening an existing file must not fail on migrations
        Database::open(&path).unwrap();
    }
}
