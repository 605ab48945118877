//! Content checksum used to verify convergence between peers

use rusqlite::Connection;
use sha2::{Digest, Sha256};

use super::protocol::StatusResponse;
use crate::db::{SqliteCategoryRepository, SqliteNoteRepository};
use crate::error::Result;

/// SHA-256 over the sorted live note GUIDs, a `|`, then the sorted live
/// category GUIDs. GUIDs within each list are separated by `\n`.
pub fn compute_checksum(note_guids: &[String], category_guids: &[String]) -> String {
    let mut notes = note_guids.to_vec();
    notes.sort_unstable();
    let mut categories = category_guids.to_vec();
    categories.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(notes.join("\n").as_bytes());
    hasher.update(b"|");
    hasher.update(categories.join("\n").as_bytes());
    hex::encode(hasher.finalize())
}

/// Counts and checksum of the live entities in a store
pub fn store_status(conn: &Connection) -> Result<StatusResponse> {
    let notes = SqliteNoteRepository::new(conn).live_guids()?;
    let categories = SqliteCategoryRepository::new(conn).live_guids()?;
    Ok(StatusResponse {
        note_count: notes.len(),
        category_count: categories.len(),
        checksum: compute_checksum(&notes, &categories),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guids(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn order_does_not_matter() {
        assert_eq!(
            compute_checksum(&guids(&["b", "a"]), &guids(&["y", "x"])),
            compute_checksum(&guids(&["a", "b"]), &guids(&["x", "y"]))
        );
    }

    #[test]
    fn notes_and_categories_are_not_interchangeable() {
        assert_ne!(
            compute_checksum(&guids(&["a"]), &[]),
            compute_checksum(&[], &guids(&["a"]))
        );
    }

    #[test]
    fn tombstones_are_excluded() {
        let mut store = crate::DualStore::open_in_memory("tester").unwrap();
        let empty = store.status().unwrap();
        assert_eq!(empty.note_count, 0);
        assert_eq!(empty.checksum.len(), 64);

        let note = store
            .create_note(crate::models::NoteInput::new("Title", "Body"))
            .unwrap()
            .into_value();
        let with_note = store.status().unwrap();
        assert_eq!(with_note.note_count, 1);
        assert_ne!(with_note.checksum, empty.checksum);

        store.delete_note(&note.guid).unwrap();
        assert_eq!(store.status().unwrap(), empty);
    }
}
