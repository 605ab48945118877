//! Unified sync envelope
//!
//! Note and category change logs are merged into one chronologically ordered,
//! paginated stream per remote peer.

use std::collections::HashSet;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::db::{SqliteCategoryRepository, SqliteChangeRepository, SqliteNoteRepository};
use crate::error::Result;
use crate::models::{ChangeRecord, EntityType, Fragment, Operation};

/// One change as exchanged between peers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEnvelope {
    /// Sender-local change id, informational only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub guid: String,
    pub entity_type: EntityType,
    pub entity_guid: String,
    pub operation: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment: Option<Fragment>,
    /// Note: its authoring time. Category: its `updated_at`.
    pub authored_at: i64,
    pub author: String,
    pub created_at: i64,
}

impl ChangeEnvelope {
    /// Deletes, and `Sync` changes materializing a delete
    pub fn is_delete(&self) -> bool {
        match self.operation {
            Operation::Delete => true,
            Operation::Sync => self.fragment.is_none(),
            Operation::Create | Operation::Update => false,
        }
    }

    /// Wrap a stored change, loading its fragment and resolving `authored_at`
    pub fn from_record(conn: &Connection, entity: EntityType, record: ChangeRecord) -> Result<Self> {
        let fragment = SqliteChangeRepository::new(conn).fragment_for(entity, &record)?;
        let authored_at = match entity {
            EntityType::Note => SqliteNoteRepository::new(conn)
                .get_by_guid(&record.entity_guid)?
                .map(|stored| stored.note.authored_at),
            EntityType::Category => SqliteCategoryRepository::new(conn)
                .get_by_guid(&record.entity_guid)?
                .map(|stored| stored.category.updated_at),
        }
        .unwrap_or(record.created_at);

        Ok(Self {
            id: Some(record.id),
            guid: record.guid,
            entity_type: entity,
            entity_guid: record.entity_guid,
            operation: record.operation,
            fragment,
            authored_at,
            author: record.author,
            created_at: record.created_at,
        })
    }
}

/// A page of the merged stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangePage {
    pub changes: Vec<ChangeEnvelope>,
    pub has_more: bool,
}

/// Categories sort before notes on equal timestamps so a category is always
/// materialized before a mapping that references it
const fn entity_rank(entity: EntityType) -> u8 {
    match entity {
        EntityType::Category => 0,
        EntityType::Note => 1,
    }
}

/// Up to `limit` changes not yet delivered to `peer_id`, oldest first
pub fn collect_unsent(conn: &Connection, peer_id: &str, limit: usize) -> Result<ChangePage> {
    collect_unsent_excluding(conn, peer_id, limit, &HashSet::new())
}

/// Like [`collect_unsent`], but passes over the change GUIDs in `exclude`.
/// Excluded changes stay unsent; they are only hidden from this page.
pub fn collect_unsent_excluding(
    conn: &Connection,
    peer_id: &str,
    limit: usize,
    exclude: &HashSet<String>,
) -> Result<ChangePage> {
    let repo = SqliteChangeRepository::new(conn);
    // Excluded rows can only shadow that many slots per table
    let fetch = limit.saturating_add(exclude.len()).saturating_add(1);

    let mut changes = Vec::new();
    for entity in [EntityType::Category, EntityType::Note] {
        for record in repo.unsent(entity, peer_id, fetch)? {
            if exclude.contains(&record.guid) {
                continue;
            }
            changes.push(ChangeEnvelope::from_record(conn, entity, record)?);
        }
    }

    changes.sort_by_key(|change| (change.created_at, entity_rank(change.entity_type)));

    let has_more = changes.len() > limit;
    changes.truncate(limit);
    Ok(ChangePage { changes, has_more })
}
