//! Conflict detection and resolution
//!
//! A remote change conflicts with local state when the target entity still
//! has locally authored changes that were never delivered to the remote peer.
//! The newest of those is compared with the incoming change.

use std::fmt;

use rusqlite::Connection;

use super::envelope::ChangeEnvelope;
use crate::db::{SqliteChangeRepository, SqliteConflictRepository};
use crate::error::Result;
use crate::util::now_millis;

/// Which side of a conflict prevails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Local,
    Remote,
}

/// Outcome of a conflict, as recorded in the audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    DeleteWinsLocal,
    DeleteWinsRemote,
    LastWriterLocal,
    LastWriterRemote,
    /// Two categories with the same name; the incoming one is kept
    NameCollisionRemote,
}

impl Resolution {
    pub const fn winner(self) -> Side {
        match self {
            Self::DeleteWinsLocal | Self::LastWriterLocal => Side::Local,
            Self::DeleteWinsRemote | Self::LastWriterRemote | Self::NameCollisionRemote => {
                Side::Remote
            }
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::DeleteWinsLocal => "delete_wins_local",
            Self::DeleteWinsRemote => "delete_wins_remote",
            Self::LastWriterLocal => "lww_local",
            Self::LastWriterRemote => "lww_remote",
            Self::NameCollisionRemote => "name_collision_remote",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Decide between the newest pending local change and an incoming change.
///
/// A delete on either side wins outright (the remote one when both delete).
/// Otherwise the later `authored_at` wins and ties go to the remote side.
pub fn resolve(local: &ChangeEnvelope, remote: &ChangeEnvelope) -> Resolution {
    if remote.is_delete() {
        return Resolution::DeleteWinsRemote;
    }
    if local.is_delete() {
        return Resolution::DeleteWinsLocal;
    }
    if remote.authored_at >= local.authored_at {
        Resolution::LastWriterRemote
    } else {
        Resolution::LastWriterLocal
    }
}

/// The newest locally authored change of the entity not yet delivered to
/// `peer_id`, if any
pub fn pending_local_change(
    conn: &Connection,
    remote: &ChangeEnvelope,
    peer_id: &str,
) -> Result<Option<ChangeEnvelope>> {
    let pending = SqliteChangeRepository::new(conn).pending_local(
        remote.entity_type,
        &remote.entity_guid,
        peer_id,
    )?;
    pending
        .into_iter()
        .next()
        .map(|record| ChangeEnvelope::from_record(conn, remote.entity_type, record))
        .transpose()
}

/// Append both sides and the outcome to the audit log
pub fn record_conflict(
    conn: &Connection,
    local: &ChangeEnvelope,
    remote: &ChangeEnvelope,
    resolution: Resolution,
) -> Result<()> {
    SqliteConflictRepository::new(conn).record(
        remote.entity_type,
        &remote.entity_guid,
        &serde_json::to_string(local)?,
        &serde_json::to_string(remote)?,
        resolution.label(),
        now_millis(),
    )?;
    tracing::info!(
        entity = %remote.entity_type,
        entity_guid = %remote.entity_guid,
        resolution = %resolution,
        "Resolved sync conflict"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityType, Fragment, NoteFragment, Operation};

    fn envelope(operation: Operation, authored_at: i64) -> ChangeEnvelope {
        let fragment = match operation {
            Operation::Delete => None,
            _ => Some(Fragment::Note(NoteFragment {
                bitmask: NoteFragment::TITLE,
                title: Some("t".to_string()),
                ..NoteFragment::default()
            })),
        };
        ChangeEnvelope {
            id: None,
            guid: format!("{operation}-{authored_at}"),
            entity_type: EntityType::Note,
            entity_guid: "n1".to_string(),
            operation,
            fragment,
            authored_at,
            author: "tester".to_string(),
            created_at: authored_at,
        }
    }

    #[test]
    fn delete_beats_update_regardless_of_time() {
        for (local_at, remote_at) in [(1, 100), (100, 1), (50, 50)] {
            let resolution = resolve(
                &envelope(Operation::Update, local_at),
                &envelope(Operation::Delete, remote_at),
            );
            assert_eq!(resolution, Resolution::DeleteWinsRemote);

            let resolution = resolve(
                &envelope(Operation::Delete, local_at),
                &envelope(Operation::Update, remote_at),
            );
            assert_eq!(resolution, Resolution::DeleteWinsLocal);
        }
    }

    #[test]
    fn sync_without_fragment_counts_as_delete() {
        let mut remote = envelope(Operation::Sync, 1);
        remote.fragment = None;
        assert_eq!(
            resolve(&envelope(Operation::Update, 100), &remote),
            Resolution::DeleteWinsRemote
        );
    }

    #[test]
    fn later_author_wins() {
        assert_eq!(
            resolve(&envelope(Operation::Update, 10), &envelope(Operation::Update, 20)),
            Resolution::LastWriterRemote
        );
        assert_eq!(
            resolve(&envelope(Operation::Update, 20), &envelope(Operation::Update, 10)),
            Resolution::LastWriterLocal
        );
    }

    #[test]
    fn ties_go_to_remote() {
        let resolution = resolve(
            &envelope(Operation::Update, 42),
            &envelope(Operation::Sync, 42),
        );
        assert_eq!(resolution, Resolution::LastWriterRemote);
        assert_eq!(resolution.winner(), Side::Remote);
        assert_eq!(resolution.label(), "lww_remote");
    }
}
