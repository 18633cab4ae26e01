//! Durable offline operation queue.
//!
//! Pending mutations are persisted in the local key-value store, one entry
//! per item under `offline_queue:<id>`. Replay order is timestamp ascending
//! with the per-queue enqueue sequence as tie-break.
//!
//! Bookkeeping lives under separate prefixes so a queued item is never
//! rewritten after enqueue:
//! - `sync_failures:<id>`: consecutive failed replays
//! - `dead_letter:<id>`: items that exhausted their attempts

use crate::error::{SyncError, SyncResult};
use crate::types::{DeadLetter, Operation, QueueItem};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use successdesk_storage::KvStore;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

const QUEUE_PREFIX: &str = "offline_queue:";
const FAILURE_PREFIX: &str = "sync_failures:";
const DEAD_LETTER_PREFIX: &str = "dead_letter:";

const EVENT_CAPACITY: usize = 256;

/// Change notifications emitted by the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    /// An item was durably enqueued.
    Queued {
        id: String,
        table: String,
        operation: Operation,
    },
    /// An item left the queue after a successful replay or explicit removal.
    Removed { id: String },
    /// An item was moved to the dead-letter list.
    DeadLettered { id: String },
    /// The whole queue was cleared.
    Cleared,
}

/// Client-local queue of pending mutations.
///
/// Cheap to clone; clones share the store, sequence counter and subscribers.
#[derive(Clone)]
pub struct OfflineQueue {
    store: Arc<dyn KvStore>,
    next_sequence: Arc<AtomicU64>,
    events: broadcast::Sender<QueueEvent>,
}

impl OfflineQueue {
    /// Opens a queue over `store`, resuming the sequence after any
    /// persisted items.
    pub async fn open(store: Arc<dyn KvStore>) -> SyncResult<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let queue = Self {
            store,
            next_sequence: Arc::new(AtomicU64::new(0)),
            events,
        };

        let items = queue.list_pending().await?;
        let dead = queue.dead_letters().await?;
        let next = items
            .iter()
            .map(|i| i.sequence)
            .chain(dead.iter().map(|d| d.item.sequence))
            .max()
            .map_or(0, |max| max + 1);
        queue.next_sequence.store(next, Ordering::SeqCst);

        if !items.is_empty() {
            info!("[QUEUE] Resumed with {} pending operations", items.len());
        }
        Ok(queue)
    }

    /// Subscribes to queue change notifications. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Persists a new pending mutation and returns its id.
    ///
    /// The `Queued` notification is only sent once the write is durable.
    pub async fn enqueue(
        &self,
        table: impl Into<String>,
        operation: Operation,
        data: Value,
    ) -> SyncResult<String> {
        let table = table.into();
        if table.trim().is_empty() {
            return Err(SyncError::InvalidItem("table name must not be empty".into()));
        }

        let item = QueueItem {
            id: Uuid::now_v7().to_string(),
            table,
            operation,
            data,
            timestamp: Utc::now(),
            sequence: self.next_sequence.fetch_add(1, Ordering::SeqCst),
        };
        let json = serde_json::to_string(&item)?;
        let key = queue_key(&item.id);

        self.blocking(move |store| Ok(store.set(&key, &json)?))
            .await?;

        debug!(
            "[QUEUE] Queued {} on {} ({})",
            item.operation, item.table, item.id
        );
        let _ = self.events.send(QueueEvent::Queued {
            id: item.id.clone(),
            table: item.table,
            operation: item.operation,
        });
        Ok(item.id)
    }

    /// Returns all pending items in replay order. Does not modify the store.
    pub async fn list_pending(&self) -> SyncResult<Vec<QueueItem>> {
        let entries = self
            .blocking(|store| Ok(store.entries_with_prefix(QUEUE_PREFIX)?))
            .await?;

        let mut items: Vec<QueueItem> = entries
            .into_iter()
            .filter_map(|(key, json)| match serde_json::from_str(&json) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!("[QUEUE] Skipping unreadable entry {key}: {e}");
                    None
                }
            })
            .collect();
        items.sort_by(QueueItem::replay_order);
        Ok(items)
    }

    /// Removes an item. Removing an unknown id is a no-op.
    pub async fn remove(&self, id: &str) -> SyncResult<()> {
        let item_key = queue_key(id);
        let failure_key = failure_key(id);
        let existed = self
            .blocking(move |store| {
                let existed = store.remove(&item_key)?;
                store.remove(&failure_key)?;
                Ok(existed)
            })
            .await?;

        if existed {
            let _ = self.events.send(QueueEvent::Removed { id: id.to_string() });
        }
        Ok(())
    }

    /// Removes several items; same as calling [`remove`](Self::remove) for each.
    pub async fn clear_completed(&self, ids: &[String]) -> SyncResult<()> {
        for id in ids {
            self.remove(id).await?;
        }
        Ok(())
    }

    /// Drops every pending item, failure count and dead letter (e.g. on logout).
    /// Returns how many pending items were discarded.
    pub async fn clear(&self) -> SyncResult<usize> {
        let removed = self
            .blocking(|store| {
                let removed = store.clear_prefix(QUEUE_PREFIX)?;
                store.clear_prefix(FAILURE_PREFIX)?;
                store.clear_prefix(DEAD_LETTER_PREFIX)?;
                Ok(removed)
            })
            .await?;

        info!("[QUEUE] Cleared {removed} pending operations");
        let _ = self.events.send(QueueEvent::Cleared);
        Ok(removed)
    }

    /// Number of pending items.
    pub async fn len(&self) -> SyncResult<usize> {
        let entries = self
            .blocking(|store| Ok(store.entries_with_prefix(QUEUE_PREFIX)?))
            .await?;
        Ok(entries.len())
    }

    pub async fn is_empty(&self) -> SyncResult<bool> {
        Ok(self.len().await? == 0)
    }

    // ── Failure bookkeeping ──────────────────────────────────────

    /// Consecutive failed replays recorded for `id`.
    pub async fn failure_count(&self, id: &str) -> SyncResult<u32> {
        let key = failure_key(id);
        self.blocking(move |store| read_count(store, &key)).await
    }

    /// Records one more failed replay and returns the new count.
    ///
    /// Returns `None` without writing if the item has left the queue in the
    /// meantime (e.g. a `clear()` while its replay was in flight).
    pub(crate) async fn record_failure(&self, id: &str) -> SyncResult<Option<u32>> {
        let item_key = queue_key(id);
        let key = failure_key(id);
        self.blocking(move |store| {
            if store.get(&item_key)?.is_none() {
                return Ok(None);
            }
            let attempts = read_count(store, &key)? + 1;
            store.set(&key, &attempts.to_string())?;
            Ok(Some(attempts))
        })
        .await
    }

    // ── Dead letters ─────────────────────────────────────────────

    /// Moves `item` out of the pending queue into the dead-letter list.
    ///
    /// Returns `false` without writing if the item is no longer queued.
    pub(crate) async fn dead_letter(
        &self,
        item: &QueueItem,
        attempts: u32,
        last_error: String,
    ) -> SyncResult<bool> {
        let letter = DeadLetter {
            item: item.clone(),
            attempts,
            last_error,
            failed_at: Utc::now(),
        };
        let json = serde_json::to_string(&letter)?;
        let id = item.id.clone();

        let moved = self
            .blocking(move |store| {
                if store.get(&queue_key(&id))?.is_none() {
                    return Ok(false);
                }
                store.set(&dead_letter_key(&id), &json)?;
                store.remove(&queue_key(&id))?;
                store.remove(&failure_key(&id))?;
                Ok(true)
            })
            .await?;
        if !moved {
            debug!("[QUEUE] {} left the queue before it could be dead-lettered", item.id);
            return Ok(false);
        }

        warn!(
            "[QUEUE] Dead-lettered {} on {} after {} attempts ({})",
            item.operation, item.table, attempts, item.id
        );
        let _ = self.events.send(QueueEvent::DeadLettered {
            id: item.id.clone(),
        });
        Ok(true)
    }

    /// Items that exhausted their attempts, oldest first.
    pub async fn dead_letters(&self) -> SyncResult<Vec<DeadLetter>> {
        let entries = self
            .blocking(|store| Ok(store.entries_with_prefix(DEAD_LETTER_PREFIX)?))
            .await?;

        let mut letters: Vec<DeadLetter> = entries
            .into_iter()
            .filter_map(|(key, json)| match serde_json::from_str(&json) {
                Ok(letter) => Some(letter),
                Err(e) => {
                    warn!("[QUEUE] Skipping unreadable dead letter {key}: {e}");
                    None
                }
            })
            .collect();
        letters.sort_by(|a, b| QueueItem::replay_order(&a.item, &b.item));
        Ok(letters)
    }

    /// Puts a dead-lettered item back in the pending queue with a fresh
    /// attempt count. It keeps its original timestamp and sequence.
    pub async fn requeue_dead_letter(&self, id: &str) -> SyncResult<()> {
        let id_owned = id.to_string();
        let item = self
            .blocking(move |store| {
                let Some(json) = store.get(&dead_letter_key(&id_owned))? else {
                    return Ok(None);
                };
                let letter: DeadLetter = serde_json::from_str(&json)?;
                store.set(&queue_key(&id_owned), &serde_json::to_string(&letter.item)?)?;
                store.remove(&dead_letter_key(&id_owned))?;
                Ok(Some(letter.item))
            })
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("dead letter {id}")))?;

        info!("[QUEUE] Requeued dead letter {}", item.id);
        let _ = self.events.send(QueueEvent::Queued {
            id: item.id,
            table: item.table,
            operation: item.operation,
        });
        Ok(())
    }

    /// Drops a dead-lettered item for good. Returns `false` if it was not present.
    pub async fn discard_dead_letter(&self, id: &str) -> SyncResult<bool> {
        let key = dead_letter_key(id);
        self.blocking(move |store| Ok(store.remove(&key)?)).await
    }

    async fn blocking<T, F>(&self, f: F) -> SyncResult<T>
    where
        F: FnOnce(&dyn KvStore) -> SyncResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| SyncError::Task(e.to_string()))?
    }
}

fn queue_key(id: &str) -> String {
    format!("{QUEUE_PREFIX}{id}")
}

fn failure_key(id: &str) -> String {
    format!("{FAILURE_PREFIX}{id}")
}

fn dead_letter_key(id: &str) -> String {
    format!("{DEAD_LETTER_PREFIX}{id}")
}

fn read_count(store: &dyn KvStore, key: &str) -> SyncResult<u32> {
    Ok(store
        .get(key)?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0))
}
