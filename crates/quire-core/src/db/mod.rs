//! Database layer for Quire

mod category_repository;
mod change_repository;
mod conflict_repository;
mod connection;
mod migrations;
mod note_repository;
mod peer_state_repository;

pub use category_repository::{SqliteCategoryRepository, StoredCategory};
pub use change_repository::{NewChange, SqliteChangeRepository};
pub use conflict_repository::SqliteConflictRepository;
pub use connection::{Database, StoreRole};
pub use note_repository::{RawLink, SqliteNoteRepository, StoredNote};
pub use peer_state_repository::{SqlitePeerStateRepository, SyncMilestone};
