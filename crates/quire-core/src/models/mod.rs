//! Data models for Quire

mod category;
mod change;
mod fragment;
mod note;
mod peer_state;
mod sync_conflict;

pub use category::{Category, CategoryInput};
pub use change::{ChangeRecord, EntityType, Operation};
pub use fragment::{CategoryFragment, Fragment, NoteFragment};
pub use note::{normalize_links, CategoryLink, Note, NoteInput};
pub use peer_state::PeerSyncState;
pub use sync_conflict::SyncConflict;
