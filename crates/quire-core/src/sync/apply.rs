//! Apply engine
//!
//! Materializes a change received from another peer into the local dual
//! store. Every applied change is re-recorded locally as a `Sync` change under
//! the incoming GUID, carrying a full snapshot of the entity (or no fragment
//! for a delete), and is marked as already delivered to the peer it came from.

use crate::changelog::{self, apply_diff, ChangeLog};
use crate::db::{
    SqliteCategoryRepository, SqliteChangeRepository, SqliteNoteRepository, StoredCategory,
};
use crate::error::{Error, Result};
use crate::models::{
    Category, CategoryFragment, EntityType, Fragment, Note, NoteFragment, Operation,
};
use crate::store::DualStore;
use crate::util::now_millis;

use super::conflict::{pending_local_change, record_conflict, resolve, Resolution, Side};
use super::envelope::ChangeEnvelope;

/// What happened to one incoming change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// A change with this GUID was applied before
    Duplicate,
    /// Nothing to do; the reason is logged
    Skipped(&'static str),
    /// The change met pending local edits; `applied` is false when the local
    /// side won and the incoming change was discarded
    Conflict {
        resolution: Resolution,
        applied: bool,
    },
}

impl ApplyOutcome {
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Create,
    Update,
    Delete,
}

/// Apply one change received from `origin`
pub fn apply_change(
    store: &mut DualStore,
    change: &ChangeEnvelope,
    origin: &str,
) -> Result<ApplyOutcome> {
    if SqliteChangeRepository::new(store.authoritative()).change_exists(&change.guid)? {
        tracing::debug!(change = %change.guid, "Change already applied");
        return Ok(ApplyOutcome::Duplicate);
    }

    let exists = match change.entity_type {
        EntityType::Note => store.load_note(&change.entity_guid)?.is_some(),
        EntityType::Category => store.load_category(&change.entity_guid)?.is_some(),
    };
    let action = match change.operation {
        Operation::Create => Action::Create,
        Operation::Update => Action::Update,
        Operation::Delete => Action::Delete,
        Operation::Sync if change.fragment.is_none() => Action::Delete,
        Operation::Sync if exists => Action::Update,
        Operation::Sync => Action::Create,
    };

    if action == Action::Create {
        if exists {
            tracing::debug!(entity_guid = %change.entity_guid, "Entity already exists; skipping create");
            return Ok(ApplyOutcome::Skipped("entity already exists"));
        }
        return match change.entity_type {
            EntityType::Note => create_note(store, change, origin),
            EntityType::Category => create_category(store, change, origin),
        };
    }

    let mut resolution = None;
    if let Some(local) = pending_local_change(store.authoritative(), change, origin)? {
        let outcome = resolve(&local, change);
        record_conflict(store.authoritative(), &local, change, outcome)?;
        if outcome.winner() == Side::Local {
            reassert_local(store, &local, origin)?;
            return Ok(ApplyOutcome::Conflict {
                resolution: outcome,
                applied: false,
            });
        }
        resolution = Some(outcome);
    }

    let outcome = match (change.entity_type, action) {
        (EntityType::Note, Action::Update) => update_note(store, change, origin)?,
        (EntityType::Category, Action::Update) => update_category(store, change, origin)?,
        (EntityType::Note, _) => delete_note(store, change, origin)?,
        (EntityType::Category, _) => delete_category(store, change, origin)?,
    };

    let Some(resolution) = resolution else {
        return Ok(outcome);
    };
    // The local edits lost; they must never reach the origin afterwards
    SqliteChangeRepository::new(store.authoritative()).supersede_pending(
        change.entity_type,
        &change.entity_guid,
        origin,
        now_millis(),
    )?;
    Ok(ApplyOutcome::Conflict {
        resolution,
        applied: outcome == ApplyOutcome::Applied,
    })
}

fn note_fragment(change: &ChangeEnvelope) -> Result<&NoteFragment> {
    match &change.fragment {
        Some(Fragment::Note(fragment)) => Ok(fragment),
        _ => Err(Error::InvalidInput(format!(
            "change {} carries no note fragment",
            change.guid
        ))),
    }
}

fn category_fragment(change: &ChangeEnvelope) -> Result<&CategoryFragment> {
    match &change.fragment {
        Some(Fragment::Category(fragment)) => Ok(fragment),
        _ => Err(Error::InvalidInput(format!(
            "change {} carries no category fragment",
            change.guid
        ))),
    }
}

/// New body from a fragment: patch `base` when the fragment holds a diff
fn materialize_body(base: &str, fragment: &NoteFragment) -> Result<String> {
    let body = fragment.body.clone().unwrap_or_default();
    if fragment.body_is_diff {
        apply_diff(base, &body)
    } else {
        Ok(body)
    }
}

fn create_note(
    store: &mut DualStore,
    change: &ChangeEnvelope,
    origin: &str,
) -> Result<ApplyOutcome> {
    let fragment = note_fragment(change)?;
    let now = now_millis();
    let note = Note {
        id: 0,
        guid: change.entity_guid.clone(),
        title: fragment.title.clone().unwrap_or_default(),
        description: fragment.description.clone(),
        body: materialize_body("", fragment)?,
        is_private: fragment.is_private.unwrap_or(false),
        authored_at: change.authored_at,
        created_at: now,
        updated_at: now,
        deleted_at: None,
        categories: fragment.categories.clone().unwrap_or_default(),
    };

    let id = store.put_note(&note)?;
    finish_note(store, change, origin, id)?;
    Ok(ApplyOutcome::Applied)
}

fn update_note(
    store: &mut DualStore,
    change: &ChangeEnvelope,
    origin: &str,
) -> Result<ApplyOutcome> {
    let current = store
        .load_note(&change.entity_guid)?
        .ok_or_else(|| Error::NotFound(format!("note {}", change.entity_guid)))?;
    if current.is_deleted() {
        tracing::debug!(entity_guid = %change.entity_guid, "Ignoring update to deleted note");
        return Ok(ApplyOutcome::Skipped("entity is deleted"));
    }

    let fragment = note_fragment(change)?;
    let mut note = current.clone();
    if fragment.has(NoteFragment::TITLE) {
        note.title = fragment.title.clone().unwrap_or_default();
    }
    if fragment.has(NoteFragment::DESCRIPTION) {
        note.description.clone_from(&fragment.description);
    }
    if fragment.has(NoteFragment::BODY) {
        // A failed patch rejects the whole change
        note.body = materialize_body(&current.body, fragment)?;
    }
    if fragment.has(NoteFragment::IS_PRIVATE) {
        note.is_private = fragment.is_private.unwrap_or(false);
    }
    if fragment.has(NoteFragment::CATEGORIES) {
        note.categories = fragment.categories.clone().unwrap_or_default();
    }
    note.authored_at = change.authored_at;
    note.updated_at = now_millis();

    store.put_note(&note)?;
    finish_note(store, change, origin, note.id)?;
    Ok(ApplyOutcome::Applied)
}

fn delete_note(
    store: &mut DualStore,
    change: &ChangeEnvelope,
    origin: &str,
) -> Result<ApplyOutcome> {
    let Some(current) = store.load_note(&change.entity_guid)? else {
        return Ok(ApplyOutcome::Skipped("unknown entity"));
    };
    if !store.tombstone_note(current.id, now_millis())? {
        return Ok(ApplyOutcome::Skipped("already deleted"));
    }
    record_sync(store, change, origin, None);
    store.mirror_note(current.id);
    Ok(ApplyOutcome::Applied)
}

fn create_category(
    store: &mut DualStore,
    change: &ChangeEnvelope,
    origin: &str,
) -> Result<ApplyOutcome> {
    let fragment = category_fragment(change)?;
    let name = fragment.name.clone().unwrap_or_default();
    let collision = SqliteCategoryRepository::new(store.authoritative()).find_live_by_name(&name)?;

    let category = Category {
        id: 0,
        guid: change.entity_guid.clone(),
        name,
        description: fragment.description.clone(),
        color: fragment.color.clone(),
        parent_guid: fragment.parent_guid.clone(),
        created_at: now_millis(),
        updated_at: change.authored_at,
        deleted_at: None,
    };
    let id = store.put_category(&category)?;
    finish_category(store, change, origin, id)?;

    match collision {
        Some(loser) => {
            resolve_name_collision(store, change, origin, &loser, id)?;
            Ok(ApplyOutcome::Conflict {
                resolution: Resolution::NameCollisionRemote,
                applied: true,
            })
        }
        None => Ok(ApplyOutcome::Applied),
    }
}

fn update_category(
    store: &mut DualStore,
    change: &ChangeEnvelope,
    origin: &str,
) -> Result<ApplyOutcome> {
    let current = store
        .load_category(&change.entity_guid)?
        .ok_or_else(|| Error::NotFound(format!("category {}", change.entity_guid)))?;
    if current.is_deleted() {
        tracing::debug!(entity_guid = %change.entity_guid, "Ignoring update to deleted category");
        return Ok(ApplyOutcome::Skipped("entity is deleted"));
    }

    let fragment = category_fragment(change)?;
    let mut category = current;
    if fragment.has(CategoryFragment::NAME) {
        category.name = fragment.name.clone().unwrap_or_default();
    }
    if fragment.has(CategoryFragment::DESCRIPTION) {
        category.description.clone_from(&fragment.description);
    }
    if fragment.has(CategoryFragment::COLOR) {
        category.color.clone_from(&fragment.color);
    }
    if fragment.has(CategoryFragment::PARENT) {
        category.parent_guid.clone_from(&fragment.parent_guid);
    }
    category.updated_at = change.authored_at;

    store.put_category(&category)?;
    finish_category(store, change, origin, category.id)?;
    Ok(ApplyOutcome::Applied)
}

fn delete_category(
    store: &mut DualStore,
    change: &ChangeEnvelope,
    origin: &str,
) -> Result<ApplyOutcome> {
    let Some(current) = store.load_category(&change.entity_guid)? else {
        return Ok(ApplyOutcome::Skipped("unknown entity"));
    };
    if !store.tombstone_category(current.id, now_millis())? {
        return Ok(ApplyOutcome::Skipped("already deleted"));
    }
    record_sync(store, change, origin, None);
    store.mirror_category(current.id);
    Ok(ApplyOutcome::Applied)
}

fn finish_note(
    store: &mut DualStore,
    change: &ChangeEnvelope,
    origin: &str,
    id: i64,
) -> Result<()> {
    let note = store
        .load_note(&change.entity_guid)?
        .ok_or_else(|| Error::NotFound(format!("note {}", change.entity_guid)))?;
    let snapshot = Fragment::Note(changelog::note_snapshot(&note));
    record_sync(store, change, origin, Some(&snapshot));
    store.mirror_note(id);
    Ok(())
}

fn finish_category(
    store: &mut DualStore,
    change: &ChangeEnvelope,
    origin: &str,
    id: i64,
) -> Result<()> {
    let category = store
        .load_category(&change.entity_guid)?
        .ok_or_else(|| Error::NotFound(format!("category {}", change.entity_guid)))?;
    let snapshot = Fragment::Category(changelog::category_snapshot(&category));
    record_sync(store, change, origin, Some(&snapshot));
    store.mirror_category(id);
    Ok(())
}

/// Re-record an applied change as `Sync` under its own GUID and mark it as
/// delivered to the origin. Best-effort like every change-log write.
fn record_sync(
    store: &DualStore,
    change: &ChangeEnvelope,
    origin: &str,
    snapshot: Option<&Fragment>,
) {
    let conn = store.authoritative();
    let recorded = ChangeLog::new(conn, &change.author)
        .record(
            &change.guid,
            change.entity_type,
            &change.entity_guid,
            Operation::Sync,
            snapshot,
        )
        .and_then(|id| {
            SqliteChangeRepository::new(conn).mark_synced(
                change.entity_type,
                id,
                origin,
                now_millis(),
            )
        });

    if let Err(error) = recorded {
        tracing::warn!(
            change = %change.guid,
            entity = %change.entity_type,
            "Failed to record sync change: {error}"
        );
    }
}

/// The local side won a conflict against `origin`. The origin holds diverged
/// state, so the pending edits are replaced by one full-snapshot update that
/// applies cleanly there.
fn reassert_local(store: &DualStore, local: &ChangeEnvelope, origin: &str) -> Result<()> {
    if local.is_delete() {
        return Ok(());
    }

    let snapshot = match local.entity_type {
        EntityType::Note => store
            .load_note(&local.entity_guid)?
            .filter(|note| !note.is_deleted())
            .map(|note| Fragment::Note(changelog::note_snapshot(&note))),
        EntityType::Category => store
            .load_category(&local.entity_guid)?
            .filter(|category| !category.is_deleted())
            .map(|category| Fragment::Category(changelog::category_snapshot(&category))),
    };
    let Some(snapshot) = snapshot else {
        return Ok(());
    };

    SqliteChangeRepository::new(store.authoritative()).supersede_pending(
        local.entity_type,
        &local.entity_guid,
        origin,
        now_millis(),
    )?;
    store.change_log().record_local(
        local.entity_type,
        &local.entity_guid,
        Operation::Update,
        Some(&snapshot),
    );
    Ok(())
}

/// Two categories share a name: keep the incoming one, move every reference
/// from the local one to it and retire the local one.
fn resolve_name_collision(
    store: &mut DualStore,
    change: &ChangeEnvelope,
    origin: &str,
    loser: &StoredCategory,
    winner_id: i64,
) -> Result<()> {
    let loser_id = loser.category.id;
    let now = now_millis();

    let (affected_notes, children) = {
        let tx = store.authoritative_mut().transaction()?;
        let notes = SqliteNoteRepository::new(&tx);
        let categories = SqliteCategoryRepository::new(&tx);
        let affected_notes = notes.note_ids_linked_to(loser_id)?;
        notes.remap_category(loser_id, winner_id)?;
        let children = categories.reparent_children(loser_id, winner_id)?;
        categories.soft_delete(loser_id, now)?;
        tx.commit()?;
        (affected_notes, children)
    };

    let conn = store.authoritative();
    let changes = SqliteChangeRepository::new(conn);
    let local = changes
        .for_entity(EntityType::Category, &loser.category.guid)?
        .pop()
        .map(|record| ChangeEnvelope::from_record(conn, EntityType::Category, record))
        .transpose()?
        .unwrap_or_else(|| ChangeEnvelope {
            id: None,
            guid: String::new(),
            entity_type: EntityType::Category,
            entity_guid: loser.category.guid.clone(),
            operation: Operation::Create,
            fragment: Some(Fragment::Category(changelog::category_snapshot(
                &loser.category,
            ))),
            authored_at: loser.category.updated_at,
            author: store.author().to_string(),
            created_at: loser.category.created_at,
        });
    record_conflict(conn, &local, change, Resolution::NameCollisionRemote)?;

    // The origin never learns about the loser
    changes.supersede_pending(EntityType::Category, &loser.category.guid, origin, now)?;
    let log = store.change_log();
    if let Some(id) = log.record_local(
        EntityType::Category,
        &loser.category.guid,
        Operation::Delete,
        None,
    ) {
        changes.mark_synced(EntityType::Category, id, origin, now)?;
    }

    // Moved references travel as ordinary local edits
    for child_id in &children {
        if let Some(child) = SqliteCategoryRepository::new(conn).get(*child_id)? {
            let fragment = CategoryFragment {
                bitmask: CategoryFragment::PARENT,
                parent_guid: child.category.parent_guid.clone(),
                ..CategoryFragment::default()
            };
            log.record_local(
                EntityType::Category,
                &child.category.guid,
                Operation::Update,
                Some(&Fragment::Category(fragment)),
            );
        }
    }
    for note_id in &affected_notes {
        let repo = SqliteNoteRepository::new(conn);
        if let Some(stored) = repo.get(*note_id)? {
            let fragment = NoteFragment {
                bitmask: NoteFragment::CATEGORIES,
                categories: Some(stored.note.categories.clone()),
                ..NoteFragment::default()
            };
            log.record_local(
                EntityType::Note,
                &stored.note.guid,
                Operation::Update,
                Some(&Fragment::Note(fragment)),
            );
        }
    }

    store.mirror_category(loser_id);
    for child_id in children {
        store.mirror_category(child_id);
    }
    for note_id in affected_notes {
        store.mirror_note(note_id);
    }

    tracing::info!(
        winner = %change.entity_guid,
        loser = %loser.category.guid,
        "Merged categories with the same name"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::changelog::compute_diff;
    use crate::models::{CategoryInput, CategoryLink, NoteInput};

    const ORIGIN: &str = "origin-peer";

    fn store() -> DualStore {
        DualStore::open_in_memory("local").unwrap()
    }

    fn envelope(
        guid: &str,
        entity_type: EntityType,
        entity_guid: &str,
        operation: Operation,
        fragment: Option<Fragment>,
        authored_at: i64,
    ) -> ChangeEnvelope {
        ChangeEnvelope {
            id: None,
            guid: guid.to_string(),
            entity_type,
            entity_guid: entity_guid.to_string(),
            operation,
            fragment,
            authored_at,
            author: "remote".to_string(),
            created_at: authored_at,
        }
    }

    fn note_create(guid: &str, entity_guid: &str, title: &str, body: &str) -> ChangeEnvelope {
        let fragment = changelog::note_fragment(None, &NoteInput::new(title, body))
            .map(Fragment::Note);
        envelope(guid, EntityType::Note, entity_guid, Operation::Create, fragment, 1_000)
    }

    fn title_update(guid: &str, entity_guid: &str, title: &str, authored_at: i64) -> ChangeEnvelope {
        let fragment = NoteFragment {
            bitmask: NoteFragment::TITLE,
            title: Some(title.to_string()),
            ..NoteFragment::default()
        };
        envelope(
            guid,
            EntityType::Note,
            entity_guid,
            Operation::Update,
            Some(Fragment::Note(fragment)),
            authored_at,
        )
    }

    fn category_create(guid: &str, entity_guid: &str, name: &str) -> ChangeEnvelope {
        let fragment = changelog::category_fragment(None, &CategoryInput::new(name))
            .map(Fragment::Category);
        envelope(guid, EntityType::Category, entity_guid, Operation::Create, fragment, 1_000)
    }

    fn change_count(store: &DualStore, entity: EntityType, entity_guid: &str) -> usize {
        SqliteChangeRepository::new(store.authoritative())
            .for_entity(entity, entity_guid)
            .unwrap()
            .len()
    }

    #[test]
    fn create_records_sync_change_marked_for_origin() {
        let mut store = store();
        let change = note_create("c1", "n1", "X", "hello");

        assert_eq!(apply_change(&mut store, &change, ORIGIN).unwrap(), ApplyOutcome::Applied);

        let note = store.get_note("n1").unwrap().unwrap();
        assert_eq!(note.title, "X");
        assert_eq!(note.authored_at, 1_000);

        let repo = SqliteChangeRepository::new(store.authoritative());
        let recorded = repo.get_by_guid(EntityType::Note, "c1").unwrap().unwrap();
        assert_eq!(recorded.operation, Operation::Sync);
        assert_eq!(recorded.author, "remote");
        assert!(repo.unsent(EntityType::Note, ORIGIN, 10).unwrap().is_empty());
        assert_eq!(repo.unsent(EntityType::Note, "third-peer", 10).unwrap().len(), 1);
    }

    #[test]
    fn applying_the_same_guid_twice_is_a_no_op() {
        let mut store = store();
        let change = note_create("c1", "n1", "X", "hello");
        apply_change(&mut store, &change, ORIGIN).unwrap();
        let before = store.get_note("n1").unwrap();

        assert_eq!(apply_change(&mut store, &change, ORIGIN).unwrap(), ApplyOutcome::Duplicate);
        assert_eq!(store.get_note("n1").unwrap(), before);
        assert_eq!(store.list_notes(10, 0).unwrap().len(), 1);
        assert_eq!(change_count(&store, EntityType::Note, "n1"), 1);
    }

    #[test]
    fn create_for_existing_entity_is_skipped() {
        let mut store = store();
        apply_change(&mut store, &note_create("c1", "n1", "X", ""), ORIGIN).unwrap();
        let outcome = apply_change(&mut store, &note_create("c2", "n1", "Y", ""), ORIGIN).unwrap();
        assert_eq!(outcome, ApplyOutcome::Skipped("entity already exists"));
        assert_eq!(store.get_note("n1").unwrap().unwrap().title, "X");
    }

    #[test]
    fn update_touches_only_selected_fields() {
        let mut store = store();
        apply_change(&mut store, &note_create("c1", "n1", "X", "body"), ORIGIN).unwrap();
        apply_change(&mut store, &title_update("c2", "n1", "Y", 2_000), ORIGIN).unwrap();

        let note = store.get_note("n1").unwrap().unwrap();
        assert_eq!(note.title, "Y");
        assert_eq!(note.body, "body");
        assert_eq!(note.authored_at, 2_000);
    }

    #[test]
    fn diff_body_is_patched_and_bad_diff_rejects_update() {
        let mut store = store();
        let old = "line one\nline two\nline three\n";
        apply_change(&mut store, &note_create("c1", "n1", "X", old), ORIGIN).unwrap();

        let new = "line one\nline 2\nline three\n";
        let good = envelope(
            "c2",
            EntityType::Note,
            "n1",
            Operation::Update,
            Some(Fragment::Note(NoteFragment {
                bitmask: NoteFragment::BODY | NoteFragment::TITLE,
                title: Some("patched".to_string()),
                body: Some(compute_diff(old, new)),
                body_is_diff: true,
                ..NoteFragment::default()
            })),
            2_000,
        );
        assert_eq!(apply_change(&mut store, &good, ORIGIN).unwrap(), ApplyOutcome::Applied);
        assert_eq!(store.get_note("n1").unwrap().unwrap().body, new);

        // Same diff again under a new GUID no longer matches the body
        let mut stale = good.clone();
        stale.guid = "c3".to_string();
        if let Some(Fragment::Note(fragment)) = &mut stale.fragment {
            fragment.title = Some("must not apply".to_string());
        }
        assert!(matches!(
            apply_change(&mut store, &stale, ORIGIN),
            Err(Error::Patch(_))
        ));
        let note = store.get_note("n1").unwrap().unwrap();
        assert_eq!(note.title, "patched");
        assert_eq!(note.body, new);
        assert_eq!(change_count(&store, EntityType::Note, "n1"), 2);
    }

    #[test]
    fn update_to_unknown_entity_fails_and_to_tombstone_is_skipped() {
        let mut store = store();
        assert!(matches!(
            apply_change(&mut store, &title_update("c1", "ghost", "Y", 5), ORIGIN),
            Err(Error::NotFound(_))
        ));

        apply_change(&mut store, &note_create("c2", "n1", "X", ""), ORIGIN).unwrap();
        let delete = envelope("c3", EntityType::Note, "n1", Operation::Delete, None, 2_000);
        assert_eq!(apply_change(&mut store, &delete, ORIGIN).unwrap(), ApplyOutcome::Applied);
        assert_eq!(store.get_note("n1").unwrap(), None);

        let outcome = apply_change(&mut store, &title_update("c4", "n1", "Y", 3_000), ORIGIN).unwrap();
        assert_eq!(outcome, ApplyOutcome::Skipped("entity is deleted"));
    }

    #[test]
    fn repeated_delete_is_idempotent() {
        let mut store = store();
        apply_change(&mut store, &note_create("c1", "n1", "X", ""), ORIGIN).unwrap();
        let first = envelope("c2", EntityType::Note, "n1", Operation::Delete, None, 2_000);
        let second = envelope("c3", EntityType::Note, "n1", Operation::Delete, None, 3_000);
        assert_eq!(apply_change(&mut store, &first, ORIGIN).unwrap(), ApplyOutcome::Applied);
        assert_eq!(
            apply_change(&mut store, &second, ORIGIN).unwrap(),
            ApplyOutcome::Skipped("already deleted")
        );
    }

    #[test]
    fn sync_change_materializes_create_update_and_delete() {
        let mut store = store();
        let snapshot = |title: &str| {
            Some(Fragment::Note(changelog::note_snapshot(&Note {
                id: 0,
                guid: "n1".to_string(),
                title: title.to_string(),
                description: None,
                body: "body".to_string(),
                is_private: false,
                authored_at: 0,
                created_at: 0,
                updated_at: 0,
                deleted_at: None,
                categories: Vec::new(),
            })))
        };

        let create = envelope("s1", EntityType::Note, "n1", Operation::Sync, snapshot("A"), 1);
        apply_change(&mut store, &create, ORIGIN).unwrap();
        assert_eq!(store.get_note("n1").unwrap().unwrap().title, "A");

        let update = envelope("s2", EntityType::Note, "n1", Operation::Sync, snapshot("B"), 2);
        apply_change(&mut store, &update, ORIGIN).unwrap();
        assert_eq!(store.get_note("n1").unwrap().unwrap().title, "B");

        let delete = envelope("s3", EntityType::Note, "n1", Operation::Sync, None, 3);
        apply_change(&mut store, &delete, ORIGIN).unwrap();
        assert_eq!(store.get_note("n1").unwrap(), None);
    }

    #[test]
    fn mapping_is_replaced_and_unknown_categories_wait_for_arrival() {
        let mut store = store();
        apply_change(&mut store, &category_create("k1", "cat-a", "A"), ORIGIN).unwrap();
        apply_change(&mut store, &category_create("k2", "cat-b", "B"), ORIGIN).unwrap();
        apply_change(&mut store, &note_create("c1", "n1", "X", ""), ORIGIN).unwrap();

        let mapping = |guid: &str, links: Vec<CategoryLink>| {
            envelope(
                guid,
                EntityType::Note,
                "n1",
                Operation::Update,
                Some(Fragment::Note(NoteFragment {
                    bitmask: NoteFragment::CATEGORIES,
                    categories: Some(links),
                    ..NoteFragment::default()
                })),
                5,
            )
        };

        apply_change(
            &mut store,
            &mapping("c2", vec![CategoryLink::new("cat-a"), CategoryLink::new("cat-b")]),
            ORIGIN,
        )
        .unwrap();
        apply_change(
            &mut store,
            &mapping("c3", vec![CategoryLink::new("cat-b"), CategoryLink::new("later")]),
            ORIGIN,
        )
        .unwrap();

        let expected = vec![CategoryLink::new("cat-b"), CategoryLink::new("later")];
        let note = store.get_note("n1").unwrap().unwrap();
        assert_eq!(note.categories, expected);
        let notes = SqliteNoteRepository::new(store.authoritative());
        assert_eq!(notes.raw_links(note.id).unwrap().len(), 1);

        // The re-recorded snapshot still names the missing category
        let conn = store.authoritative();
        let record = SqliteChangeRepository::new(conn)
            .get_by_guid(EntityType::Note, "c3")
            .unwrap()
            .unwrap();
        let recorded = ChangeEnvelope::from_record(conn, EntityType::Note, record).unwrap();
        let Some(Fragment::Note(snapshot)) = recorded.fragment else {
            panic!("expected a note snapshot");
        };
        assert_eq!(snapshot.categories, Some(expected.clone()));

        // Once the category arrives the link is completed without a new change
        let changes_before = change_count(&store, EntityType::Note, "n1");
        apply_change(&mut store, &category_create("k3", "later", "Later"), ORIGIN).unwrap();
        let notes = SqliteNoteRepository::new(store.authoritative());
        assert_eq!(notes.raw_links(note.id).unwrap().len(), 2);
        assert!(notes.pending_links(note.id).unwrap().is_empty());
        assert_eq!(store.get_note("n1").unwrap().unwrap().categories, expected);
        assert_eq!(change_count(&store, EntityType::Note, "n1"), changes_before);
    }

    #[test]
    fn remote_delete_beats_pending_local_update() {
        let mut store = store();
        apply_change(&mut store, &note_create("c1", "n1", "X", ""), ORIGIN).unwrap();
        let mut input = store.get_note("n1").unwrap().unwrap().to_input();
        input.title = "local edit".to_string();
        store.update_note("n1", input).unwrap();

        let delete = envelope("c2", EntityType::Note, "n1", Operation::Delete, None, 1);
        let outcome = apply_change(&mut store, &delete, ORIGIN).unwrap();
        assert_eq!(
            outcome,
            ApplyOutcome::Conflict {
                resolution: Resolution::DeleteWinsRemote,
                applied: true
            }
        );
        assert_eq!(store.get_note("n1").unwrap(), None);

        // The losing edit is never pushed to the origin
        let pending = SqliteChangeRepository::new(store.authoritative())
            .pending_local(EntityType::Note, "n1", ORIGIN)
            .unwrap();
        assert!(pending.is_empty());
        assert_eq!(store.list_conflicts(10).unwrap()[0].resolution, "delete_wins_remote");
    }

    #[test]
    fn pending_local_delete_discards_remote_update() {
        let mut store = store();
        apply_change(&mut store, &note_create("c1", "n1", "X", ""), ORIGIN).unwrap();
        store.delete_note("n1").unwrap();

        let outcome =
            apply_change(&mut store, &title_update("c2", "n1", "Y", i64::MAX), ORIGIN).unwrap();
        assert_eq!(
            outcome,
            ApplyOutcome::Conflict {
                resolution: Resolution::DeleteWinsLocal,
                applied: false
            }
        );
        assert_eq!(store.get_note("n1").unwrap(), None);
    }

    #[test]
    fn newer_local_edit_wins_and_is_reasserted_as_snapshot() {
        let mut store = store();
        apply_change(&mut store, &note_create("c1", "n1", "X", "body"), ORIGIN).unwrap();
        let mut input = store.get_note("n1").unwrap().unwrap().to_input();
        input.title = "local".to_string();
        let local = store.update_note("n1", input).unwrap().into_value();

        let outcome = apply_change(
            &mut store,
            &title_update("c2", "n1", "remote", local.authored_at - 1),
            ORIGIN,
        )
        .unwrap();
        assert_eq!(
            outcome,
            ApplyOutcome::Conflict {
                resolution: Resolution::LastWriterLocal,
                applied: false
            }
        );
        assert_eq!(store.get_note("n1").unwrap().unwrap().title, "local");

        let repo = SqliteChangeRepository::new(store.authoritative());
        let pending = repo.pending_local(EntityType::Note, "n1", ORIGIN).unwrap();
        assert_eq!(pending.len(), 1);
        let Some(Fragment::Note(fragment)) = repo.fragment_for(EntityType::Note, &pending[0]).unwrap()
        else {
            panic!("expected snapshot fragment");
        };
        assert_eq!(fragment.bitmask, NoteFragment::ALL);
        assert!(!fragment.body_is_diff);
    }

    #[test]
    fn equal_authored_at_favours_remote() {
        let mut store = store();
        apply_change(&mut store, &note_create("c1", "n1", "X", ""), ORIGIN).unwrap();
        let mut input = store.get_note("n1").unwrap().unwrap().to_input();
        input.title = "local".to_string();
        let local = store.update_note("n1", input).unwrap().into_value();

        let outcome = apply_change(
            &mut store,
            &title_update("c2", "n1", "remote", local.authored_at),
            ORIGIN,
        )
        .unwrap();
        assert_eq!(
            outcome,
            ApplyOutcome::Conflict {
                resolution: Resolution::LastWriterRemote,
                applied: true
            }
        );
        assert_eq!(store.get_note("n1").unwrap().unwrap().title, "remote");
    }

    #[test]
    fn name_collision_keeps_remote_category_and_remaps_notes() {
        let mut store = store();
        let local = store
            .create_category(CategoryInput::new("Work"))
            .unwrap()
            .into_value();
        let child = store
            .create_category(CategoryInput::new("Meetings").with_parent(local.guid.clone()))
            .unwrap()
            .into_value();
        let note = store
            .create_note(NoteInput::new("Plan", "").with_categories(vec![
                CategoryLink::new(local.guid.clone()).with_subcategory(child.guid.clone()),
            ]))
            .unwrap()
            .into_value();

        let outcome =
            apply_change(&mut store, &category_create("k1", "remote-work", "work"), ORIGIN)
                .unwrap();
        assert_eq!(
            outcome,
            ApplyOutcome::Conflict {
                resolution: Resolution::NameCollisionRemote,
                applied: true
            }
        );

        assert_eq!(store.get_category(&local.guid).unwrap(), None);
        assert_eq!(
            store.get_category(&child.guid).unwrap().unwrap().parent_guid.as_deref(),
            Some("remote-work")
        );
        assert_eq!(
            store.get_note(&note.guid).unwrap().unwrap().categories,
            vec![CategoryLink::new("remote-work").with_subcategory(child.guid.clone())]
        );

        // No junction row still points at the retired category
        let orphans: i64 = store
            .authoritative()
            .query_row(
                "SELECT COUNT(*) FROM note_categories WHERE category_id = ?1 OR subcategory_id = ?1",
                [local.id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(orphans, 0);

        // Nothing about the loser is sent back to the origin
        let repo = SqliteChangeRepository::new(store.authoritative());
        assert!(repo
            .unsent(EntityType::Category, ORIGIN, 100)
            .unwrap()
            .iter()
            .all(|change| change.entity_guid != local.guid));
        assert_eq!(
            store.list_conflicts(10).unwrap()[0].resolution,
            "name_collision_remote"
        );
    }
}
