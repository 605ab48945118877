//! Background sync client for one hub
//!
//! A cycle is: health check, authenticate, pull every page and apply it,
//! push unsent local changes in batches, then compare checksums. The timer
//! loop and manual triggers share one non-blocking guard, so a trigger that
//! arrives while a cycle runs is dropped rather than queued.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::SyncClientConfig;
use crate::db::{SqliteChangeRepository, SqlitePeerStateRepository, SyncMilestone};
use crate::error::{Error, Result};
use crate::models::EntityType;
use crate::state::SyncState;
use crate::store::SharedStore;
use crate::util::now_millis;

use super::apply::{apply_change, ApplyOutcome};
use super::backoff::backoff;
use super::envelope::collect_unsent_excluding;
use super::protocol::PushRequest;
use super::transport::{SyncTransport, TransportError, TransportResult};

/// Counters for one completed cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub pulled: usize,
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
    pub conflicts: usize,
    pub pushed: usize,
    pub rejected: usize,
    /// `None` when verification did not run
    pub checksum_match: Option<bool>,
}

/// Snapshot of the client's health
#[derive(Debug, Clone)]
pub struct ClientStatus {
    pub state: SyncState,
    pub consecutive_failures: u32,
    /// Earliest time the timer loop will try again
    pub next_retry_at: Option<Instant>,
    pub last_report: Option<SyncReport>,
}

impl Default for ClientStatus {
    fn default() -> Self {
        Self {
            state: SyncState::Offline,
            consecutive_failures: 0,
            next_retry_at: None,
            last_report: None,
        }
    }
}

pub struct SyncClient {
    store: SharedStore,
    transport: Arc<dyn SyncTransport>,
    config: SyncClientConfig,
    pub(super) cycle: Mutex<()>,
    status: StdMutex<ClientStatus>,
}

impl SyncClient {
    pub fn new(
        store: SharedStore,
        transport: Arc<dyn SyncTransport>,
        config: SyncClientConfig,
    ) -> Self {
        Self {
            store,
            transport,
            config,
            cycle: Mutex::new(()),
            status: StdMutex::new(ClientStatus::default()),
        }
    }

    pub const fn config(&self) -> &SyncClientConfig {
        &self.config
    }

    pub fn status(&self) -> ClientStatus {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn state(&self) -> SyncState {
        self.status().state
    }

    fn update_status(&self, update: impl FnOnce(&mut ClientStatus)) {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        update(&mut status);
    }

    /// Run one cycle now. Returns `Ok(None)` when a cycle is already running.
    pub async fn sync_now(&self) -> Result<Option<SyncReport>> {
        let Ok(_guard) = self.cycle.try_lock() else {
            tracing::debug!("Sync already in progress; ignoring trigger");
            return Ok(None);
        };

        self.update_status(|status| status.state = SyncState::Syncing);
        let started = Instant::now();

        match self.run_cycle().await {
            Ok(report) => {
                tracing::info!(
                    hub = %self.config.hub_url,
                    pulled = report.pulled,
                    applied = report.applied,
                    conflicts = report.conflicts,
                    failed = report.failed,
                    pushed = report.pushed,
                    rejected = report.rejected,
                    elapsed_ms = started.elapsed().as_millis(),
                    "Sync cycle complete"
                );
                self.update_status(|status| {
                    status.state = SyncState::Synced;
                    status.consecutive_failures = 0;
                    status.next_retry_at = None;
                    status.last_report = Some(report.clone());
                });
                Ok(Some(report))
            }
            Err(error) => {
                let offline = matches!(
                    error,
                    Error::Transport(TransportError::Unavailable(_) | TransportError::Http(_))
                );
                let mut failures = 0;
                let mut delay = Duration::ZERO;
                self.update_status(|status| {
                    status.consecutive_failures = status.consecutive_failures.saturating_add(1);
                    failures = status.consecutive_failures;
                    delay = backoff(
                        failures,
                        self.config.backoff_base,
                        self.config.backoff_ceiling,
                    );
                    status.next_retry_at = Some(Instant::now() + delay);
                    status.state = if offline {
                        SyncState::Offline
                    } else {
                        SyncState::Error
                    };
                });
                tracing::error!(
                    hub = %self.config.hub_url,
                    failures,
                    retry_in_secs = delay.as_secs(),
                    "Sync cycle failed: {error}"
                );
                Err(error)
            }
        }
    }

    /// Timer loop. Runs a cycle immediately, then once per interval, skipping
    /// ticks that fall inside the backoff window. Stops when `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            hub = %self.config.hub_url,
            interval_secs = self.config.interval.as_secs(),
            "Starting background sync"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let wait = self.backoff_remaining();
            if wait.is_zero() {
                self.sync_now().await.ok();
            } else {
                tracing::debug!(retry_in_secs = wait.as_secs(), "Backing off");
            }

            let sleep_for = self.config.interval.max(self.backoff_remaining());
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(sleep_for) => {}
            }
        }

        tracing::info!(hub = %self.config.hub_url, "Background sync stopped");
    }

    fn backoff_remaining(&self) -> Duration {
        self.status()
            .next_retry_at
            .map_or(Duration::ZERO, |at| at.saturating_duration_since(Instant::now()))
    }

    async fn run_cycle(&self) -> Result<SyncReport> {
        let hub = self.config.hub_url.as_str();

        self.transport.health().await?;

        let (peer_id, cached_token) = {
            let store = self.store.lock().await;
            let state = SqlitePeerStateRepository::new(store.authoritative()).load_or_create(hub)?;
            (state.peer_id, state.auth_token)
        };
        let mut token = match cached_token {
            Some(token) => token,
            None => self.login().await?,
        };

        let mut report = SyncReport::default();
        self.pull_all(&mut token, &peer_id, &mut report).await?;
        self.push_all(&mut token, &peer_id, &mut report).await?;
        self.verify(&mut token, &mut report).await?;

        let store = self.store.lock().await;
        SqlitePeerStateRepository::new(store.authoritative()).touch(
            hub,
            SyncMilestone::Sync,
            now_millis(),
        )?;
        Ok(report)
    }

    async fn login(&self) -> Result<String> {
        let token = self
            .transport
            .login(&self.config.username, &self.config.password)
            .await?;
        let store = self.store.lock().await;
        SqlitePeerStateRepository::new(store.authoritative())
            .save_token(&self.config.hub_url, Some(&token))?;
        tracing::debug!(hub = %self.config.hub_url, "Logged in to hub");
        Ok(token)
    }

    /// Call the hub with the current token; on `Unauthorized` log in once
    /// more and retry once
    async fn authed<T, F, Fut>(&self, token: &mut String, call: F) -> Result<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = TransportResult<T>>,
    {
        match call(token.clone()).await {
            Err(TransportError::Unauthorized) => {
                tracing::info!(hub = %self.config.hub_url, "Token rejected; logging in again");
                *token = self.login().await?;
                Ok(call(token.clone()).await?)
            }
            result => Ok(result?),
        }
    }

    async fn pull_all(
        &self,
        token: &mut String,
        peer_id: &str,
        report: &mut SyncReport,
    ) -> Result<()> {
        let hub = self.config.hub_url.as_str();
        let limit = self.config.page_limit;

        loop {
            let page = self
                .authed(token, |token| {
                    let transport = Arc::clone(&self.transport);
                    let peer_id = peer_id.to_string();
                    async move { transport.pull(&token, &peer_id, limit).await }
                })
                .await?;
            let fetched = page.changes.len();
            report.pulled += fetched;

            {
                let mut store = self.store.lock().await;
                for change in &page.changes {
                    match apply_change(&mut store, change, hub) {
                        Ok(ApplyOutcome::Applied) => report.applied += 1,
                        Ok(ApplyOutcome::Duplicate | ApplyOutcome::Skipped(_)) => {
                            report.skipped += 1;
                        }
                        Ok(ApplyOutcome::Conflict { applied, .. }) => {
                            report.conflicts += 1;
                            if applied {
                                report.applied += 1;
                            } else {
                                report.skipped += 1;
                            }
                        }
                        Err(error) => {
                            report.failed += 1;
                            tracing::warn!(
                                change = %change.guid,
                                entity = %change.entity_type,
                                entity_guid = %change.entity_guid,
                                "Failed to apply pulled change: {error}"
                            );
                        }
                    }
                }
                SqlitePeerStateRepository::new(store.authoritative()).touch(
                    hub,
                    SyncMilestone::Pull,
                    now_millis(),
                )?;
            }

            if !page.has_more {
                return Ok(());
            }
            if fetched == 0 {
                tracing::warn!(hub, "Hub reported more changes but sent an empty page");
                return Ok(());
            }
        }
    }

    /// Push unsent changes in batches of `push_limit`. Every change sent in
    /// this cycle is excluded from later batches, so changes the hub rejects
    /// stay unsent for the next cycle without blocking the ones behind them.
    async fn push_all(
        &self,
        token: &mut String,
        peer_id: &str,
        report: &mut SyncReport,
    ) -> Result<()> {
        let hub = self.config.hub_url.as_str();
        let mut sent: HashSet<String> = HashSet::new();

        loop {
            let page = {
                let store = self.store.lock().await;
                collect_unsent_excluding(
                    store.authoritative(),
                    hub,
                    self.config.push_limit,
                    &sent,
                )?
            };
            if page.changes.is_empty() {
                return Ok(());
            }

            let request = PushRequest {
                peer_id: peer_id.to_string(),
                changes: page.changes,
            };
            let response = self
                .authed(token, |token| {
                    let transport = Arc::clone(&self.transport);
                    let request = request.clone();
                    async move { transport.push(&token, &request).await }
                })
                .await?;

            let entities: HashMap<&str, EntityType> = request
                .changes
                .iter()
                .map(|change| (change.guid.as_str(), change.entity_type))
                .collect();

            {
                let store = self.store.lock().await;
                let repo = SqliteChangeRepository::new(store.authoritative());
                let now = now_millis();
                for guid in &response.accepted {
                    match entities.get(guid.as_str()) {
                        Some(entity) => {
                            repo.mark_synced_by_guid(*entity, guid, hub, now)?;
                        }
                        None => {
                            tracing::warn!(change = %guid, "Hub accepted a change that was not sent");
                        }
                    }
                }
                SqlitePeerStateRepository::new(store.authoritative()).touch(
                    hub,
                    SyncMilestone::Push,
                    now,
                )?;
            }
            for rejected in &response.rejected {
                tracing::warn!(
                    change = %rejected.guid,
                    reason = %rejected.reason,
                    "Hub rejected change; retrying next cycle"
                );
            }

            report.pushed += response.accepted.len();
            report.rejected += response.rejected.len();
            sent.extend(request.changes.into_iter().map(|change| change.guid));

            if !page.has_more {
                return Ok(());
            }
        }
    }

    /// Compare checksums with the hub. A mismatch is only logged.
    async fn verify(&self, token: &mut String, report: &mut SyncReport) -> Result<()> {
        let remote = self
            .authed(token, |token| {
                let transport = Arc::clone(&self.transport);
                async move { transport.status(&token).await }
            })
            .await?;
        let local = self.store.lock().await.status()?;

        let matches = local.checksum == remote.checksum;
        if !matches {
            tracing::warn!(
                hub = %self.config.hub_url,
                local_notes = local.note_count,
                remote_notes = remote.note_count,
                local_categories = local.category_count,
                remote_categories = remote.category_count,
                "Checksum differs from hub; expecting convergence on a later cycle"
            );
        }
        report.checksum_match = Some(matches);
        Ok(())
    }
}
