//! Hub-side protocol service
//!
//! Serves pull pages, accepts pushes and reports status over a shared dual
//! store. Transport concerns (routing, auth) live in the hub binary.

use crate::config::{DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
use crate::db::SqliteChangeRepository;
use crate::error::{Error, Result};
use crate::store::SharedStore;
use crate::util::now_millis;

use super::apply::{apply_change, ApplyOutcome};
use super::envelope::collect_unsent;
use super::protocol::{PullResponse, PushRequest, PushResponse, RejectedChange, StatusResponse};

#[derive(Clone)]
pub struct SyncHub {
    store: SharedStore,
}

impl SyncHub {
    pub const fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Next page of changes the peer has not received. Every served change
    /// is marked as delivered, so the following request gets the next page.
    pub async fn pull(&self, peer_id: &str, limit: Option<usize>) -> Result<PullResponse> {
        let peer_id = validate_peer_id(peer_id)?;
        let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
            return Err(Error::InvalidInput(format!(
                "limit must be in [1, {MAX_PAGE_LIMIT}]"
            )));
        }

        let store = self.store.lock().await;
        let conn = store.authoritative();
        let page = collect_unsent(conn, peer_id, limit)?;

        let repo = SqliteChangeRepository::new(conn);
        let now = now_millis();
        for change in &page.changes {
            if let Some(id) = change.id {
                repo.mark_synced(change.entity_type, id, peer_id, now)?;
            }
        }

        tracing::debug!(
            peer_id,
            served = page.changes.len(),
            has_more = page.has_more,
            "Served pull page"
        );
        Ok(PullResponse {
            changes: page.changes,
            has_more: page.has_more,
        })
    }

    /// Apply pushed changes in order. Changes that fail are reported back and
    /// stay unsent on the peer.
    pub async fn push(&self, request: PushRequest) -> Result<PushResponse> {
        let peer_id = validate_peer_id(&request.peer_id)?;
        let mut store = self.store.lock().await;

        let mut response = PushResponse::default();
        for change in &request.changes {
            match apply_change(&mut store, change, peer_id) {
                Ok(outcome) => {
                    if let ApplyOutcome::Skipped(reason) = outcome {
                        tracing::debug!(change = %change.guid, reason, "Skipped pushed change");
                    }
                    response.accepted.push(change.guid.clone());
                }
                Err(error) => {
                    tracing::warn!(
                        peer_id,
                        change = %change.guid,
                        entity_guid = %change.entity_guid,
                        "Rejected pushed change: {error}"
                    );
                    response.rejected.push(RejectedChange {
                        guid: change.guid.clone(),
                        reason: error.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            peer_id,
            accepted = response.accepted.len(),
            rejected = response.rejected.len(),
            "Processed push"
        );
        Ok(response)
    }

    pub async fn status(&self) -> Result<StatusResponse> {
        self.store.lock().await.status()
    }
}

fn validate_peer_id(peer_id: &str) -> Result<&str> {
    let peer_id = peer_id.trim();
    if peer_id.is_empty() {
        return Err(Error::InvalidInput("peer_id must not be empty".to_string()));
    }
    Ok(peer_id)
}
