use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

use crate::capabilities::{Collaborators, LedgerReader, Session};
use crate::config::DashboardConfig;
use crate::event::DashboardEvent;
use crate::model::{FenceRecord, LocationStats, RecordKey};
use crate::notifier::Notifier;
use crate::{get_current_time_ms, AppError, AppResult, ErrorKind};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReloadOutcome {
    pub ticket: u64,
    pub fences: Vec<FenceRecord>,
    pub stats: LocationStats,
    /// Records whose fetch failed and were left out.
    pub dropped: Vec<RecordKey>,
    /// False when a newer reload had already been applied.
    pub applied: bool,
}

#[derive(Debug, Clone, Default)]
struct FenceStore {
    fences: Vec<FenceRecord>,
    stats: LocationStats,
    applied_ticket: u64,
}

struct RefreshGuard<'a>(&'a AtomicUsize);

impl<'a> RefreshGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Owns the local fence list. Every reload replaces it wholesale; results
/// of a reload that started before the last applied one are discarded.
pub struct FenceListSynchronizer {
    reader: Arc<dyn LedgerReader>,
    session: Arc<dyn Session>,
    notifier: Arc<Notifier>,
    recent_window_secs: u64,
    store: RwLock<FenceStore>,
    next_ticket: AtomicU64,
    in_flight: AtomicUsize,
}

impl FenceListSynchronizer {
    #[must_use]
    pub fn new(
        collaborators: &Collaborators,
        notifier: Arc<Notifier>,
        config: &DashboardConfig,
    ) -> Self {
        Self {
            reader: collaborators.reader.clone(),
            session: collaborators.session.clone(),
            notifier,
            recent_window_secs: config.recent_window_secs,
            store: RwLock::new(FenceStore::default()),
            next_ticket: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
        }
    }

    #[instrument(skip(self))]
    pub async fn reload(&self) -> AppResult<ReloadOutcome> {
        if !self.session.is_connected() {
            debug!("reload skipped, no active session");
            return Ok(ReloadOutcome::default());
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst) + 1;
        let _refreshing = RefreshGuard::enter(&self.in_flight);

        let keys = match self.reader.list_record_ids().await {
            Ok(keys) => keys,
            Err(e) => {
                error!(ticket, error = %e, "failed to list fence records");
                self.notifier.error("Failed to load data");
                return Err(AppError::from(e).with_context("ticket", ticket.to_string()));
            }
        };

        let now_ms = get_current_time_ms();
        let mut fences = Vec::with_capacity(keys.len());
        let mut dropped = Vec::new();

        for key in keys {
            match self.reader.get_record(&key).await {
                Ok(record) => fences.push(FenceRecord::from_ledger(key, &record, now_ms)),
                Err(e) => {
                    let err =
                        AppError::new(ErrorKind::PartialLoadFailure, "record could not be loaded")
                            .with_internal(e.to_string())
                            .with_context("key", key.as_str());
                    warn!(key = %key, error = %err, "dropping record from reload");
                    dropped.push(key);
                }
            }
        }

        let stats = LocationStats::compute(&fences, now_ms / 1000, self.recent_window_secs);
        let applied = self.apply(ticket, fences.clone(), stats.clone()).await;

        if applied {
            info!(ticket, count = fences.len(), dropped = dropped.len(), "fence list reloaded");
            self.notifier
                .push_history(format!("Loaded {} encrypted fences", fences.len()));
            self.notifier.publish(DashboardEvent::FencesReloaded {
                ticket,
                count: fences.len(),
                dropped: dropped.len(),
            });
        } else {
            debug!(ticket, "reload superseded by a newer one, result discarded");
        }

        Ok(ReloadOutcome {
            ticket,
            fences,
            stats,
            dropped,
            applied,
        })
    }

    async fn apply(&self, ticket: u64, fences: Vec<FenceRecord>, stats: LocationStats) -> bool {
        let mut store = self.store.write().await;
        if ticket <= store.applied_ticket {
            return false;
        }
        *store = FenceStore {
            fences,
            stats,
            applied_ticket: ticket,
        };
        true
    }

    /// Empties the list and invalidates any reload still in flight.
    pub async fn clear(&self) {
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst) + 1;
        let mut store = self.store.write().await;
        *store = FenceStore {
            applied_ticket: ticket,
            ..FenceStore::default()
        };
    }

    pub async fn fences(&self) -> Vec<FenceRecord> {
        self.store.read().await.fences.clone()
    }

    pub async fn stats(&self) -> LocationStats {
        self.store.read().await.stats.clone()
    }

    pub async fn find(&self, key: &RecordKey) -> Option<FenceRecord> {
        self.store
            .read()
            .await
            .fences
            .iter()
            .find(|f| &f.location_handle == key)
            .cloned()
    }

    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }
}
