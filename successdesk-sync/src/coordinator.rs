//! Replays queued operations against the backend.
//!
//! One cycle: take a snapshot of the pending queue, replay each item in
//! order, remove successes immediately, count failures and move on. Items
//! enqueued after the snapshot wait for the next cycle. At most one cycle
//! runs at a time; a trigger that arrives mid-cycle is skipped.

use crate::backend::Backend;
use crate::config::{SyncConfig, SyncFrequency};
use crate::connectivity::Connectivity;
use crate::error::{SyncError, SyncResult};
use crate::metrics::SyncMetrics;
use crate::queue::OfflineQueue;
use crate::types::{Operation, QueueItem};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

const EVENT_CAPACITY: usize = 64;

/// Why a sync request did not start a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Another cycle is in progress.
    AlreadySyncing,
    /// No connectivity.
    Offline,
    /// The pending queue could not be read.
    StorageUnavailable(String),
}

/// Result classification of a completed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStatus {
    /// Nothing was pending; the backend was not contacted.
    NoOp,
    Success,
    PartialFailure,
}

/// Summary of one completed cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Failed items that reached the attempt limit during this cycle.
    pub dead_lettered: usize,
    pub duration: Duration,
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    pub fn status(&self) -> CycleStatus {
        if self.attempted == 0 {
            CycleStatus::NoOp
        } else if self.failed == 0 {
            CycleStatus::Success
        } else {
            CycleStatus::PartialFailure
        }
    }

    /// Human-readable summary for status toasts.
    pub fn summary(&self) -> String {
        match self.status() {
            CycleStatus::NoOp => "Nothing to synchronize".to_string(),
            CycleStatus::Success => {
                format!("Successfully synchronized {} operations", self.succeeded)
            }
            CycleStatus::PartialFailure => format!(
                "Successfully synchronized {} operations, {} failed",
                self.succeeded, self.failed
            ),
        }
    }
}

/// Outcome of a sync request.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Completed(SyncReport),
    Skipped(SkipReason),
}

impl SyncOutcome {
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncOutcome::Completed(report) => Some(report),
            SyncOutcome::Skipped(_) => None,
        }
    }
}

/// Notifications emitted by the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A cycle took its snapshot of `pending` items.
    Started { pending: usize },
    Completed(SyncReport),
    Skipped(SkipReason),
}

/// Point-in-time view for the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncStatus {
    pub is_syncing: bool,
    pub frequency: SyncFrequency,
    pub last_sync: Option<SyncReport>,
    pub metrics: SyncMetrics,
}

#[derive(Default)]
struct CoordinatorState {
    last_sync: Option<SyncReport>,
    metrics: SyncMetrics,
}

struct Inner {
    queue: OfflineQueue,
    backend: Arc<dyn Backend>,
    connectivity: Connectivity,
    id_field: String,
    max_attempts: u32,
    syncing: AtomicBool,
    frequency: watch::Sender<SyncFrequency>,
    state: Mutex<CoordinatorState>,
    events: broadcast::Sender<SyncEvent>,
}

/// Drains the offline queue against the backend. Cheap to clone.
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<Inner>,
}

/// Clears the in-flight flag when a cycle ends, including by panic.
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SyncCoordinator {
    pub fn new(
        queue: OfflineQueue,
        backend: Arc<dyn Backend>,
        connectivity: Connectivity,
        config: &SyncConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (frequency, _) = watch::channel(config.frequency);
        Self {
            inner: Arc::new(Inner {
                queue,
                backend,
                connectivity,
                id_field: config.id_field.clone(),
                max_attempts: config.max_attempts,
                syncing: AtomicBool::new(false),
                frequency,
                state: Mutex::new(CoordinatorState::default()),
                events,
            }),
        }
    }

    pub fn queue(&self) -> &OfflineQueue {
        &self.inner.queue
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.inner.connectivity
    }

    /// Subscribes to sync notifications. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.syncing.load(Ordering::Acquire)
    }

    pub fn last_sync(&self) -> Option<SyncReport> {
        self.lock_state().last_sync.clone()
    }

    pub fn metrics(&self) -> SyncMetrics {
        self.lock_state().metrics.clone()
    }

    pub fn reset_metrics(&self) {
        self.lock_state().metrics = SyncMetrics::default();
    }

    pub fn status(&self) -> SyncStatus {
        let state = self.lock_state();
        SyncStatus {
            is_syncing: self.is_syncing(),
            frequency: self.frequency(),
            last_sync: state.last_sync.clone(),
            metrics: state.metrics.clone(),
        }
    }

    /// Changes how automatic triggers are scheduled.
    pub fn configure(&self, frequency: SyncFrequency) {
        let changed = self.inner.frequency.send_if_modified(|current| {
            if *current == frequency {
                false
            } else {
                *current = frequency;
                true
            }
        });
        if changed {
            info!("[SYNC] Sync frequency set to {frequency}");
        }
    }

    pub fn frequency(&self) -> SyncFrequency {
        *self.inner.frequency.borrow()
    }

    /// Watches frequency changes (used by the scheduler).
    pub fn watch_frequency(&self) -> watch::Receiver<SyncFrequency> {
        self.inner.frequency.subscribe()
    }

    /// Runs one sync cycle now, unless one is already running or we are offline.
    pub async fn sync_now(&self) -> SyncOutcome {
        if !self.inner.connectivity.is_online() {
            debug!("[SYNC] Offline, skipping sync");
            return self.skip(SkipReason::Offline);
        }

        if self
            .inner
            .syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("[SYNC] Sync already in progress, skipping");
            return self.skip(SkipReason::AlreadySyncing);
        }
        let _guard = CycleGuard(&self.inner.syncing);

        let started = Instant::now();
        let snapshot = match self.inner.queue.list_pending().await {
            Ok(items) => items,
            Err(e) => {
                error!("[SYNC] Failed to read pending operations: {e}");
                self.lock_state().metrics.record_failure();
                return self.skip(SkipReason::StorageUnavailable(e.to_string()));
            }
        };

        let _ = self.inner.events.send(SyncEvent::Started {
            pending: snapshot.len(),
        });
        if !snapshot.is_empty() {
            info!("[SYNC] Replaying {} pending operations", snapshot.len());
        }

        let mut succeeded = 0;
        let mut failed = 0;
        let mut dead_lettered = 0;

        for item in &snapshot {
            match self.replay(item).await {
                Ok(()) => {
                    succeeded += 1;
                    if let Err(e) = self.inner.queue.remove(&item.id).await {
                        // Left queued; the next cycle replays it again.
                        error!("[SYNC] Replayed {} but could not dequeue it: {e}", item.id);
                    }
                }
                Err(e) => {
                    failed += 1;
                    warn!(
                        "[SYNC] {} on {} failed ({}): {e}",
                        item.operation, item.table, item.id
                    );
                    if self.handle_failure(item, &e).await {
                        dead_lettered += 1;
                    }
                }
            }
        }

        let report = SyncReport {
            attempted: snapshot.len(),
            succeeded,
            failed,
            dead_lettered,
            duration: started.elapsed(),
            finished_at: Utc::now(),
        };

        match report.status() {
            CycleStatus::NoOp => debug!("[SYNC] Nothing to synchronize"),
            CycleStatus::Success => info!("[SYNC] {}", report.summary()),
            CycleStatus::PartialFailure => warn!("[SYNC] {}", report.summary()),
        }

        {
            let mut state = self.lock_state();
            state.metrics.record(&report);
            state.last_sync = Some(report.clone());
        }
        let _ = self.inner.events.send(SyncEvent::Completed(report.clone()));
        SyncOutcome::Completed(report)
    }

    async fn replay(&self, item: &QueueItem) -> SyncResult<()> {
        let backend = &self.inner.backend;
        match item.operation {
            Operation::Insert => backend.insert(&item.table, &item.data).await?,
            Operation::Update => {
                let key = self.match_key(item)?;
                backend.update(&item.table, &key, &item.data).await?
            }
            Operation::Delete => {
                let key = self.match_key(item)?;
                backend.delete(&item.table, &key).await?
            }
        }
        Ok(())
    }

    fn match_key(&self, item: &QueueItem) -> SyncResult<crate::backend::MatchKey> {
        item.match_key(&self.inner.id_field)
            .ok_or_else(|| SyncError::MissingKey {
                table: item.table.clone(),
                operation: item.operation.to_string(),
                field: self.inner.id_field.clone(),
            })
    }

    /// Bumps the item's failure count and dead-letters it at the limit.
    /// Returns true if the item was dead-lettered.
    async fn handle_failure(&self, item: &QueueItem, err: &SyncError) -> bool {
        let attempts = match self.inner.queue.record_failure(&item.id).await {
            Ok(Some(n)) => n,
            Ok(None) => {
                debug!("[SYNC] {} was removed during replay, not counting the failure", item.id);
                return false;
            }
            Err(e) => {
                warn!("[SYNC] Could not record failure for {}: {e}", item.id);
                return false;
            }
        };

        if self.inner.max_attempts == 0 || attempts < self.inner.max_attempts {
            return false;
        }

        match self
            .inner
            .queue
            .dead_letter(item, attempts, err.to_string())
            .await
        {
            Ok(moved) => moved,
            Err(e) => {
                error!("[SYNC] Could not dead-letter {}: {e}", item.id);
                false
            }
        }
    }

    fn skip(&self, reason: SkipReason) -> SyncOutcome {
        let _ = self.inner.events.send(SyncEvent::Skipped(reason.clone()));
        SyncOutcome::Skipped(reason)
    }

    fn lock_state(&self) -> MutexGuard<'_, CoordinatorState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
