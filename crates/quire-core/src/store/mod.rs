//! Dual store: an authoritative `SQLite` database plus an in-memory read cache.
//!
//! Writes go to the authoritative store first and are mirrored into the
//! cache only after they succeed. A failed mirror never rolls back the
//! authoritative write; the caller gets a degraded [`WriteOutcome`] and the
//! store remembers that a cache rebuild is owed. Reads are served from the
//! cache. Private note bodies are encrypted in the authoritative store and
//! held as plaintext in the cache.

use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Mutex;

use crate::changelog::{self, ChangeLog};
use crate::crypto::Cipher;
use crate::db::{
    Database, RawLink, SqliteCategoryRepository, SqliteConflictRepository, SqliteNoteRepository,
    StoredCategory, StoredNote,
};
use crate::error::{Error, Result};
use crate::models::{
    Category, CategoryInput, CategoryLink, EntityType, Fragment, Note, NoteInput, Operation,
    SyncConflict,
};
use crate::sync::{checksum, StatusResponse};
use crate::util::{new_guid, now_millis};

/// Store handle shared between the sync client, the hub and request handlers
pub type SharedStore = Arc<Mutex<DualStore>>;

/// Result of a write that reached the authoritative store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome<T> {
    pub value: T,
    /// Set when mirroring into the cache failed; the data is durable but
    /// reads may be stale until the cache is rebuilt
    pub cache_error: Option<String>,
}

impl<T> WriteOutcome<T> {
    pub const fn is_degraded(&self) -> bool {
        self.cache_error.is_some()
    }

    pub fn into_value(self) -> T {
        self.value
    }
}

/// Authoritative store, read cache and the collaborators around them
pub struct DualStore {
    authoritative: Database,
    cache: Database,
    cipher: Option<Arc<dyn Cipher>>,
    author: String,
    cache_dirty: bool,
}

impl DualStore {
    /// Open the authoritative store at `path` and build the cache from it.
    /// The cipher is needed up front when the store holds private notes.
    pub fn open(
        path: impl AsRef<Path>,
        author: impl Into<String>,
        cipher: Option<Arc<dyn Cipher>>,
    ) -> Result<Self> {
        Self::from_database(Database::open(path)?, author, cipher)
    }

    /// Fully in-memory store (tests, ephemeral peers)
    pub fn open_in_memory(author: impl Into<String>) -> Result<Self> {
        Self::from_database(Database::open_in_memory()?, author, None)
    }

    fn from_database(
        authoritative: Database,
        author: impl Into<String>,
        cipher: Option<Arc<dyn Cipher>>,
    ) -> Result<Self> {
        let mut store = Self {
            authoritative,
            cache: Database::open_cache()?,
            cipher,
            author: author.into(),
            cache_dirty: true,
        };
        store.rebuild_cache()?;
        Ok(store)
    }

    /// Attach the cipher used for private note bodies
    #[must_use]
    pub fn with_cipher(mut self, cipher: Arc<dyn Cipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// Wrap the store for sharing across tasks
    pub fn into_shared(self) -> SharedStore {
        Arc::new(Mutex::new(self))
    }

    /// Name recorded as the author of local changes
    pub fn author(&self) -> &str {
        &self.author
    }

    /// Whether a cache mirror failed since the last rebuild
    pub const fn is_cache_dirty(&self) -> bool {
        self.cache_dirty
    }

    pub(crate) const fn authoritative(&self) -> &Connection {
        self.authoritative.connection()
    }

    pub(crate) fn authoritative_mut(&mut self) -> &mut Connection {
        self.authoritative.connection_mut()
    }

    #[cfg(test)]
    pub(crate) const fn cache(&self) -> &Connection {
        self.cache.connection()
    }

    // ------------------------------------------------------------------
    // Local mutations
    // ------------------------------------------------------------------

    /// Create a note and record a `Create` change
    pub fn create_note(&mut self, input: NoteInput) -> Result<WriteOutcome<Note>> {
        validate_title(&input.title)?;
        let now = now_millis();
        let note = Note {
            id: 0,
            guid: new_guid(),
            title: input.title,
            description: input.description,
            body: input.body,
            is_private: input.is_private,
            authored_at: now,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            categories: crate::models::normalize_links(input.categories),
        };

        let id = self.put_note(&note)?;
        let note = self.require_note_by_id(id)?;

        let fragment = changelog::note_fragment(None, &note.to_input()).map(Fragment::Note);
        self.change_log().record_local(
            EntityType::Note,
            &note.guid,
            Operation::Create,
            fragment.as_ref(),
        );

        let cache_error = self.mirror_note(id);
        Ok(WriteOutcome {
            value: note,
            cache_error,
        })
    }

    /// Update a live note. Only differing fields are recorded; an identical
    /// input writes nothing.
    pub fn update_note(&mut self, guid: &str, input: NoteInput) -> Result<WriteOutcome<Note>> {
        validate_title(&input.title)?;
        let previous = self
            .load_note(guid)?
            .filter(|note| !note.is_deleted())
            .ok_or_else(|| Error::NotFound(format!("note {guid}")))?;

        let Some(fragment) = changelog::note_fragment(Some(&previous), &input) else {
            return Ok(WriteOutcome {
                value: previous,
                cache_error: None,
            });
        };

        let now = now_millis();
        let note = Note {
            title: input.title,
            description: input.description,
            body: input.body,
            is_private: input.is_private,
            categories: crate::models::normalize_links(input.categories),
            authored_at: now,
            updated_at: now,
            ..previous
        };
        self.put_note(&note)?;
        let note = self.require_note_by_id(note.id)?;

        self.change_log().record_local(
            EntityType::Note,
            &note.guid,
            Operation::Update,
            Some(&Fragment::Note(fragment)),
        );

        let cache_error = self.mirror_note(note.id);
        Ok(WriteOutcome {
            value: note,
            cache_error,
        })
    }

    /// Soft-delete a note. Returns `false` when it was already deleted.
    pub fn delete_note(&mut self, guid: &str) -> Result<WriteOutcome<bool>> {
        let note = self
            .load_note(guid)?
            .ok_or_else(|| Error::NotFound(format!("note {guid}")))?;

        if !self.tombstone_note(note.id, now_millis())? {
            return Ok(WriteOutcome {
                value: false,
                cache_error: None,
            });
        }

        self.change_log()
            .record_local(EntityType::Note, guid, Operation::Delete, None);

        let cache_error = self.mirror_note(note.id);
        Ok(WriteOutcome {
            value: true,
            cache_error,
        })
    }

    /// Create a category and record a `Create` change
    pub fn create_category(&mut self, input: CategoryInput) -> Result<WriteOutcome<Category>> {
        validate_name(&input.name)?;
        let now = now_millis();
        let category = Category {
            id: 0,
            guid: new_guid(),
            name: input.name,
            description: input.description,
            color: input.color,
            parent_guid: input.parent_guid,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        let id = self.put_category(&category)?;
        let category = self.require_category_by_id(id)?;

        let fragment =
            changelog::category_fragment(None, &category.to_input()).map(Fragment::Category);
        self.change_log().record_local(
            EntityType::Category,
            &category.guid,
            Operation::Create,
            fragment.as_ref(),
        );

        let cache_error = self.mirror_category(id);
        Ok(WriteOutcome {
            value: category,
            cache_error,
        })
    }

    /// Update a live category
    pub fn update_category(
        &mut self,
        guid: &str,
        input: CategoryInput,
    ) -> Result<WriteOutcome<Category>> {
        validate_name(&input.name)?;
        let previous = self
            .load_category(guid)?
            .filter(|category| !category.is_deleted())
            .ok_or_else(|| Error::NotFound(format!("category {guid}")))?;

        let Some(fragment) = changelog::category_fragment(Some(&previous), &input) else {
            return Ok(WriteOutcome {
                value: previous,
                cache_error: None,
            });
        };

        let category = Category {
            name: input.name,
            description: input.description,
            color: input.color,
            parent_guid: input.parent_guid,
            updated_at: now_millis(),
            ..previous
        };
        self.put_category(&category)?;
        let category = self.require_category_by_id(category.id)?;

        self.change_log().record_local(
            EntityType::Category,
            &category.guid,
            Operation::Update,
            Some(&Fragment::Category(fragment)),
        );

        let cache_error = self.mirror_category(category.id);
        Ok(WriteOutcome {
            value: category,
            cache_error,
        })
    }

    /// Soft-delete a category. Returns `false` when it was already deleted.
    pub fn delete_category(&mut self, guid: &str) -> Result<WriteOutcome<bool>> {
        let category = self
            .load_category(guid)?
            .ok_or_else(|| Error::NotFound(format!("category {guid}")))?;

        if !self.tombstone_category(category.id, now_millis())? {
            return Ok(WriteOutcome {
                value: false,
                cache_error: None,
            });
        }

        self.change_log()
            .record_local(EntityType::Category, guid, Operation::Delete, None);

        let cache_error = self.mirror_category(category.id);
        Ok(WriteOutcome {
            value: true,
            cache_error,
        })
    }

    // ------------------------------------------------------------------
    // Reads (cache)
    // ------------------------------------------------------------------

    /// Fetch a live note by GUID
    pub fn get_note(&self, guid: &str) -> Result<Option<Note>> {
        let stored = SqliteNoteRepository::new(self.cache.connection()).get_by_guid(guid)?;
        Ok(stored
            .map(|stored| stored.note)
            .filter(|note| !note.is_deleted()))
    }

    /// List live notes, most recently updated first
    pub fn list_notes(&self, limit: usize, offset: usize) -> Result<Vec<Note>> {
        let notes = SqliteNoteRepository::new(self.cache.connection()).list(limit, offset)?;
        Ok(notes.into_iter().map(|stored| stored.note).collect())
    }

    /// Fetch a live category by GUID
    pub fn get_category(&self, guid: &str) -> Result<Option<Category>> {
        let stored = SqliteCategoryRepository::new(self.cache.connection()).get_by_guid(guid)?;
        Ok(stored
            .map(|stored| stored.category)
            .filter(|category| !category.is_deleted()))
    }

    /// List live categories by name
    pub fn list_categories(&self) -> Result<Vec<Category>> {
        let categories = SqliteCategoryRepository::new(self.cache.connection()).list()?;
        Ok(categories
            .into_iter()
            .map(|stored| stored.category)
            .collect())
    }

    /// Recently resolved sync conflicts, newest first
    pub fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        SqliteConflictRepository::new(self.authoritative()).list(limit)
    }

    /// Live entity counts and the content checksum
    pub fn status(&self) -> Result<StatusResponse> {
        checksum::store_status(self.authoritative())
    }

    // ------------------------------------------------------------------
    // Cache maintenance
    // ------------------------------------------------------------------

    /// Rebuild the cache from the authoritative store, preserving keys
    pub fn rebuild_cache(&mut self) -> Result<()> {
        let categories = SqliteCategoryRepository::new(self.authoritative()).list_all()?;
        let stored_notes = SqliteNoteRepository::new(self.authoritative()).list_all()?;
        let mut notes = Vec::with_capacity(stored_notes.len());
        for stored in stored_notes {
            let repo = SqliteNoteRepository::new(self.authoritative());
            let links = repo.raw_links(stored.note.id)?;
            let pending = repo.pending_links(stored.note.id)?;
            notes.push((self.unseal(stored)?, links, pending));
        }

        let tx = self.cache.connection_mut().transaction()?;
        {
            let category_repo = SqliteCategoryRepository::new(&tx);
            let note_repo = SqliteNoteRepository::new(&tx);
            note_repo.clear()?;
            category_repo.clear()?;
            for category in &categories {
                category_repo.upsert_with_id(category)?;
            }
            for (note, links, pending) in &notes {
                note_repo.upsert_with_id(&StoredNote {
                    note: note.clone(),
                    body_iv: None,
                })?;
                note_repo.set_raw_links(note.id, links)?;
                note_repo.set_pending_links(note.id, pending)?;
            }
        }
        tx.commit()?;

        self.cache_dirty = false;
        tracing::info!(
            notes = notes.len(),
            categories = categories.len(),
            "Rebuilt read cache"
        );
        Ok(())
    }

    /// Copy one note row and its links from the authoritative store into the
    /// cache. Returns the failure message instead of an error.
    pub(crate) fn mirror_note(&mut self, id: i64) -> Option<String> {
        let result = self.try_mirror_note(id);
        self.absorb_mirror_result(EntityType::Note, id, result)
    }

    fn try_mirror_note(&self, id: i64) -> Result<()> {
        let repo = SqliteNoteRepository::new(self.authoritative());
        let stored = repo
            .get(id)?
            .ok_or_else(|| Error::NotFound(format!("note id {id}")))?;
        let links = repo.raw_links(id)?;
        let pending = repo.pending_links(id)?;
        let note = self.unseal(stored)?;

        let cache = SqliteNoteRepository::new(self.cache.connection());
        cache.upsert_with_id(&StoredNote {
            note,
            body_iv: None,
        })?;
        cache.set_raw_links(id, &links)?;
        cache.set_pending_links(id, &pending)?;
        Ok(())
    }

    /// Copy one category row from the authoritative store into the cache
    pub(crate) fn mirror_category(&mut self, id: i64) -> Option<String> {
        let result = self.try_mirror_category(id);
        self.absorb_mirror_result(EntityType::Category, id, result)
    }

    fn try_mirror_category(&self, id: i64) -> Result<()> {
        let stored = SqliteCategoryRepository::new(self.authoritative())
            .get(id)?
            .ok_or_else(|| Error::NotFound(format!("category id {id}")))?;
        SqliteCategoryRepository::new(self.cache.connection()).upsert_with_id(&stored)?;
        Ok(())
    }

    fn absorb_mirror_result(
        &mut self,
        entity: EntityType,
        id: i64,
        result: Result<()>,
    ) -> Option<String> {
        match result {
            Ok(()) => None,
            Err(error) => {
                self.cache_dirty = true;
                tracing::warn!(
                    entity = %entity,
                    id,
                    "Cache mirror failed, rebuild owed: {error}"
                );
                Some(error.to_string())
            }
        }
    }

    // ------------------------------------------------------------------
    // Authoritative primitives (shared with the apply engine)
    // ------------------------------------------------------------------

    pub(crate) fn change_log(&self) -> ChangeLog<'_> {
        ChangeLog::new(self.authoritative(), &self.author)
    }

    /// Load a note (tombstones included) from the authoritative store,
    /// decrypting its body
    pub(crate) fn load_note(&self, guid: &str) -> Result<Option<Note>> {
        SqliteNoteRepository::new(self.authoritative())
            .get_by_guid(guid)?
            .map(|stored| self.unseal(stored))
            .transpose()
    }

    fn require_note_by_id(&self, id: i64) -> Result<Note> {
        let stored = SqliteNoteRepository::new(self.authoritative())
            .get(id)?
            .ok_or_else(|| Error::NotFound(format!("note id {id}")))?;
        self.unseal(stored)
    }

    /// Load a category (tombstones included) from the authoritative store
    pub(crate) fn load_category(&self, guid: &str) -> Result<Option<Category>> {
        Ok(SqliteCategoryRepository::new(self.authoritative())
            .get_by_guid(guid)?
            .map(|stored| stored.category))
    }

    fn require_category_by_id(&self, id: i64) -> Result<Category> {
        SqliteCategoryRepository::new(self.authoritative())
            .get(id)?
            .map(|stored| stored.category)
            .ok_or_else(|| Error::NotFound(format!("category id {id}")))
    }

    /// Insert (`note.id == 0`) or overwrite a note row and replace its links,
    /// in one authoritative transaction. Returns the local id.
    pub(crate) fn put_note(&mut self, note: &Note) -> Result<i64> {
        let stored = self.seal(note)?;
        let (links, pending) = self.resolve_links(&note.guid, &note.categories)?;

        let tx = self.authoritative.connection_mut().transaction()?;
        let id = {
            let repo = SqliteNoteRepository::new(&tx);
            let id = if note.id == 0 {
                repo.insert(&stored)?
            } else if repo.update(&stored)? {
                note.id
            } else {
                return Err(Error::NotFound(format!("note id {}", note.id)));
            };
            repo.set_raw_links(id, &links)?;
            repo.set_pending_links(id, &pending)?;
            id
        };
        tx.commit()?;
        Ok(id)
    }

    /// Insert (`category.id == 0`) or overwrite a category row
    pub(crate) fn put_category(&mut self, category: &Category) -> Result<i64> {
        let repo = SqliteCategoryRepository::new(self.authoritative());
        let parent_id = match &category.parent_guid {
            Some(parent_guid) => {
                let parent_id = repo.id_for_guid(parent_guid)?;
                if parent_id.is_none() {
                    tracing::warn!(
                        category = %category.guid,
                        parent = %parent_guid,
                        "Parent category not present locally; storing without parent"
                    );
                }
                parent_id
            }
            None => None,
        };
        let stored = StoredCategory {
            category: category.clone(),
            parent_id,
        };

        if category.id != 0 {
            return if repo.update(&stored)? {
                Ok(category.id)
            } else {
                Err(Error::NotFound(format!("category id {}", category.id)))
            };
        }

        let id = repo.insert(&stored)?;
        self.complete_pending_links(&category.guid)?;
        Ok(id)
    }

    /// Link notes that named `category_guid` before it was replicated here.
    /// The notes' logical links are unchanged, so no change is recorded.
    fn complete_pending_links(&mut self, category_guid: &str) -> Result<()> {
        let note_ids =
            SqliteNoteRepository::new(self.authoritative()).note_ids_pending_on(category_guid)?;
        for id in note_ids {
            let note = self.require_note_by_id(id)?;
            self.put_note(&note)?;
            self.mirror_note(id);
            tracing::debug!(note = %note.guid, category = category_guid, "Completed pending link");
        }
        Ok(())
    }

    pub(crate) fn tombstone_note(&self, id: i64, at: i64) -> Result<bool> {
        SqliteNoteRepository::new(self.authoritative()).soft_delete(id, at)
    }

    pub(crate) fn tombstone_category(&self, id: i64, at: i64) -> Result<bool> {
        SqliteCategoryRepository::new(self.authoritative()).soft_delete(id, at)
    }

    /// Resolve category GUIDs to local keys. Links whose category (or
    /// subcategory) is not present locally are returned separately and kept
    /// until it arrives.
    fn resolve_links(
        &self,
        note_guid: &str,
        links: &[CategoryLink],
    ) -> Result<(Vec<RawLink>, Vec<CategoryLink>)> {
        let repo = SqliteCategoryRepository::new(self.authoritative());
        let mut resolved = Vec::with_capacity(links.len());
        let mut pending = Vec::new();
        for link in links {
            let category_id = repo.id_for_guid(&link.category_guid)?;
            let subcategory_id = match &link.subcategory_guid {
                Some(subcategory_guid) => repo.id_for_guid(subcategory_guid)?.map(Some),
                None => Some(None),
            };
            match (category_id, subcategory_id) {
                (Some(category_id), Some(subcategory_id)) => {
                    resolved.push((category_id, subcategory_id));
                }
                _ => {
                    tracing::warn!(
                        note = note_guid,
                        category = %link.category_guid,
                        subcategory = ?link.subcategory_guid,
                        "Category not yet replicated; keeping link pending"
                    );
                    pending.push(link.clone());
                }
            }
        }
        Ok((resolved, pending))
    }

    /// Authoritative row for a note, encrypting the body when private
    fn seal(&self, note: &Note) -> Result<StoredNote> {
        if !note.is_private {
            return Ok(StoredNote {
                note: note.clone(),
                body_iv: None,
            });
        }

        let cipher = self.cipher.as_ref().ok_or_else(|| {
            Error::Crypto("private notes require an encryption key".to_string())
        })?;
        let (ciphertext, iv) = cipher.encrypt(&note.body)?;
        Ok(StoredNote {
            note: Note {
                body: ciphertext,
                ..note.clone()
            },
            body_iv: Some(iv),
        })
    }

    /// Plaintext note from an authoritative row
    fn unseal(&self, stored: StoredNote) -> Result<Note> {
        let Some(iv) = stored.body_iv else {
            return Ok(stored.note);
        };

        let cipher = self.cipher.as_ref().ok_or_else(|| {
            Error::Crypto("private notes require an encryption key".to_string())
        })?;
        let body = cipher.decrypt(&stored.note.body, &iv)?;
        Ok(Note {
            body,
            ..stored.note
        })
    }
}

fn validate_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(Error::InvalidInput("note title cannot be empty".to_string()));
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::InvalidInput(
            "category name cannot be empty".to_string(),
        ));
    }
    Ok(())
}
