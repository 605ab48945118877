//! Change capture
//!
//! Every mutation of a note or category becomes an append-only change whose
//! fragment holds only the fields that differ from the previous state.

mod diff;

pub use diff::{apply_diff, compute_diff, encode_body_change};

use rusqlite::Connection;

use crate::db::{NewChange, SqliteChangeRepository};
use crate::error::Result;
use crate::models::{
    normalize_links, Category, CategoryFragment, CategoryInput, EntityType, Fragment, Note,
    NoteFragment, NoteInput, Operation,
};
use crate::util::{new_guid, now_millis};

/// Bits of the note fields that differ between `previous` and `input`.
/// Without a previous state every field counts as changed.
pub fn note_bitmask(previous: Option<&Note>, input: &NoteInput) -> u32 {
    let Some(previous) = previous else {
        return NoteFragment::ALL;
    };

    let mut bitmask = 0;
    if previous.title != input.title {
        bitmask |= NoteFragment::TITLE;
    }
    if previous.description != input.description {
        bitmask |= NoteFragment::DESCRIPTION;
    }
    if previous.body != input.body {
        bitmask |= NoteFragment::BODY;
    }
    if previous.is_private != input.is_private {
        bitmask |= NoteFragment::IS_PRIVATE;
    }
    if normalize_links(previous.categories.clone()) != normalize_links(input.categories.clone()) {
        bitmask |= NoteFragment::CATEGORIES;
    }
    bitmask
}

/// Bits of the category fields that differ between `previous` and `input`
pub fn category_bitmask(previous: Option<&Category>, input: &CategoryInput) -> u32 {
    let Some(previous) = previous else {
        return CategoryFragment::ALL;
    };

    let mut bitmask = 0;
    if previous.name != input.name {
        bitmask |= CategoryFragment::NAME;
    }
    if previous.description != input.description {
        bitmask |= CategoryFragment::DESCRIPTION;
    }
    if previous.color != input.color {
        bitmask |= CategoryFragment::COLOR;
    }
    if previous.parent_guid != input.parent_guid {
        bitmask |= CategoryFragment::PARENT;
    }
    bitmask
}

/// Build the fragment for a note mutation, or `None` when nothing changed.
///
/// Creates always store the body as a snapshot; updates store a line diff
/// when it is smaller than the new body.
pub fn note_fragment(previous: Option<&Note>, input: &NoteInput) -> Option<NoteFragment> {
    let bitmask = note_bitmask(previous, input);
    if bitmask == 0 {
        return None;
    }

    let mut fragment = NoteFragment {
        bitmask,
        ..NoteFragment::default()
    };
    if fragment.has(NoteFragment::TITLE) {
        fragment.title = Some(input.title.clone());
    }
    if fragment.has(NoteFragment::DESCRIPTION) {
        fragment.description.clone_from(&input.description);
    }
    if fragment.has(NoteFragment::BODY) {
        match previous {
            Some(previous) => {
                let (body, is_diff) = encode_body_change(&previous.body, &input.body);
                fragment.body = Some(body);
                fragment.body_is_diff = is_diff;
            }
            None => fragment.body = Some(input.body.clone()),
        }
    }
    if fragment.has(NoteFragment::IS_PRIVATE) {
        fragment.is_private = Some(input.is_private);
    }
    if fragment.has(NoteFragment::CATEGORIES) {
        fragment.categories = Some(normalize_links(input.categories.clone()));
    }
    Some(fragment)
}

/// Build the fragment for a category mutation, or `None` when nothing changed
pub fn category_fragment(
    previous: Option<&Category>,
    input: &CategoryInput,
) -> Option<CategoryFragment> {
    let bitmask = category_bitmask(previous, input);
    if bitmask == 0 {
        return None;
    }

    let mut fragment = CategoryFragment {
        bitmask,
        ..CategoryFragment::default()
    };
    if fragment.has(CategoryFragment::NAME) {
        fragment.name = Some(input.name.clone());
    }
    if fragment.has(CategoryFragment::DESCRIPTION) {
        fragment.description.clone_from(&input.description);
    }
    if fragment.has(CategoryFragment::COLOR) {
        fragment.color.clone_from(&input.color);
    }
    if fragment.has(CategoryFragment::PARENT) {
        fragment.parent_guid.clone_from(&input.parent_guid);
    }
    Some(fragment)
}

/// Full-state fragment of a note, used for `Sync` changes
pub fn note_snapshot(note: &Note) -> NoteFragment {
    note_fragment(None, &note.to_input()).unwrap_or_default()
}

/// Full-state fragment of a category, used for `Sync` changes
pub fn category_snapshot(category: &Category) -> CategoryFragment {
    category_fragment(None, &category.to_input()).unwrap_or_default()
}

/// Appends fragments and changes to the authoritative store
pub struct ChangeLog<'a> {
    conn: &'a Connection,
    author: &'a str,
}

impl<'a> ChangeLog<'a> {
    pub const fn new(conn: &'a Connection, author: &'a str) -> Self {
        Self { conn, author }
    }

    /// Insert the fragment (if any), then the change referencing it.
    /// Returns the change's local id.
    pub fn record(
        &self,
        change_guid: &str,
        entity_type: EntityType,
        entity_guid: &str,
        operation: Operation,
        fragment: Option<&Fragment>,
    ) -> Result<i64> {
        let repo = SqliteChangeRepository::new(self.conn);
        let fragment_id = match fragment {
            Some(Fragment::Note(fragment)) => Some(repo.insert_note_fragment(fragment)?),
            Some(Fragment::Category(fragment)) => Some(repo.insert_category_fragment(fragment)?),
            None => None,
        };
        repo.insert_change(
            entity_type,
            &NewChange {
                guid: change_guid,
                entity_guid,
                operation,
                fragment_id,
                author: self.author,
                created_at: now_millis(),
            },
        )
    }

    /// Record a locally authored change under a fresh GUID. Failures are
    /// logged and swallowed: replication must never block normal writes.
    pub fn record_local(
        &self,
        entity_type: EntityType,
        entity_guid: &str,
        operation: Operation,
        fragment: Option<&Fragment>,
    ) -> Option<i64> {
        let change_guid = new_guid();
        match self.record(&change_guid, entity_type, entity_guid, operation, fragment) {
            Ok(id) => {
                tracing::debug!(
                    entity = %entity_type,
                    entity_guid,
                    operation = %operation,
                    "Recorded local change"
                );
                Some(id)
            }
            Err(error) => {
                tracing::warn!(
                    entity = %entity_type,
                    entity_guid,
                    operation = %operation,
                    "Failed to record change: {error}"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::CategoryLink;
    use pretty_assertions::assert_eq;

    fn note(body: &str) -> Note {
        Note {
            id: 1,
            guid: "n1".to_string(),
            title: "Title".to_string(),
            description: Some("desc".to_string()),
            body: body.to_string(),
            is_private: false,
            authored_at: 1,
            created_at: 1,
            updated_at: 1,
            deleted_at: None,
            categories: vec![CategoryLink::new("c1")],
        }
    }

    #[test]
    fn create_marks_every_field_and_snapshots_body() {
        let input = NoteInput::new("Title", "Body");
        let fragment = note_fragment(None, &input).unwrap();
        assert_eq!(fragment.bitmask, NoteFragment::ALL);
        assert_eq!(fragment.body.as_deref(), Some("Body"));
        assert!(!fragment.body_is_diff);
        assert_eq!(fragment.categories, Some(Vec::new()));
    }

    #[test]
    fn unchanged_input_produces_no_fragment() {
        let previous = note("Body");
        assert_eq!(note_fragment(Some(&previous), &previous.to_input()), None);
    }

    #[test]
    fn title_only_update_selects_only_title() {
        let previous = note("Body");
        let mut input = previous.to_input();
        input.title = "New title".to_string();

        let fragment = note_fragment(Some(&previous), &input).unwrap();
        assert_eq!(
            fragment,
            NoteFragment {
                bitmask: NoteFragment::TITLE,
                title: Some("New title".to_string()),
                ..NoteFragment::default()
            }
        );
    }

    #[test]
    fn cleared_description_is_selected_with_no_value() {
        let previous = note("Body");
        let mut input = previous.to_input();
        input.description = None;

        let fragment = note_fragment(Some(&previous), &input).unwrap();
        assert_eq!(fragment.bitmask, NoteFragment::DESCRIPTION);
        assert_eq!(fragment.description, None);
    }

    #[test]
    fn category_order_does_not_count_as_change() {
        let mut previous = note("Body");
        previous.categories = vec![CategoryLink::new("a"), CategoryLink::new("b")];
        let mut input = previous.to_input();
        input.categories = vec![CategoryLink::new("b"), CategoryLink::new("a")];
        assert_eq!(note_bitmask(Some(&previous), &input), 0);
    }

    #[test]
    fn large_body_edit_is_stored_as_diff() {
        let body: String = (0..100).map(|n| format!("paragraph {n}\n")).collect();
        let previous = note(&body);
        let mut input = previous.to_input();
        input.body = body.replace("paragraph 50\n", "paragraph fifty\n");

        let fragment = note_fragment(Some(&previous), &input).unwrap();
        assert_eq!(fragment.bitmask, NoteFragment::BODY);
        assert!(fragment.body_is_diff);
        assert_eq!(
            apply_diff(&previous.body, fragment.body.as_deref().unwrap()).unwrap(),
            input.body
        );
    }

    #[test]
    fn category_bitmask_tracks_parent_and_color() {
        let previous = Category {
            id: 1,
            guid: "c".to_string(),
            name: "Work".to_string(),
            description: None,
            color: Some("red".to_string()),
            parent_guid: None,
            created_at: 1,
            updated_at: 1,
            deleted_at: None,
        };
        let input = CategoryInput::new("Work").with_parent("p");
        assert_eq!(
            category_bitmask(Some(&previous), &input),
            CategoryFragment::COLOR | CategoryFragment::PARENT
        );
    }

    #[test]
    fn record_inserts_fragment_then_change() {
        let db = Database::open_in_memory().unwrap();
        let log = ChangeLog::new(db.connection(), "alice");
        let fragment = Fragment::Note(note_snapshot(&note("Body")));

        let id = log
            .record_local(EntityType::Note, "n1", Operation::Create, Some(&fragment))
            .unwrap();

        let repo = SqliteChangeRepository::new(db.connection());
        let changes = repo.for_entity(EntityType::Note, "n1").unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].id, id);
        assert_eq!(changes[0].author, "alice");
        assert_eq!(
            repo.fragment_for(EntityType::Note, &changes[0]).unwrap(),
            Some(fragment)
        );
    }

    #[test]
    fn record_local_swallows_failures() {
        let db = Database::open_cache().unwrap();
        // The cache has no change log tables, so the insert fails
        let log = ChangeLog::new(db.connection(), "alice");
        assert_eq!(
            log.record_local(EntityType::Note, "n1", Operation::Delete, None),
            None
        );
    }
}
