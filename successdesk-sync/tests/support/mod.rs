//! Shared helpers for sync integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use successdesk_storage::{KvStore, MemoryKvStore, StorageError, StorageResult};
use successdesk_sync::{
    Backend, BackendError, BackendResult, Connectivity, MatchKey, OfflineQueue, SyncConfig,
    SyncCoordinator,
};
use tokio::sync::{Notify, Semaphore};
use tracing_subscriber::EnvFilter;

// ── Mock Backend ────────────────────────────────────────────────

/// A backend call captured for assertions.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Insert { table: String, record: Value },
    Update { table: String, key: String, record: Value },
    Delete { table: String, key: String },
}

/// Pauses backend calls until the test releases them.
pub struct Gate {
    pub entered: Notify,
    release: Semaphore,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entered: Notify::new(),
            release: Semaphore::new(0),
        })
    }

    /// Lets `n` blocked or future calls through.
    pub fn release(&self, n: usize) {
        self.release.add_permits(n);
    }
}

/// In-memory table store standing in for the hosted database.
#[derive(Default)]
pub struct MockBackend {
    /// (table, id) -> record
    records: Mutex<HashMap<(String, String), Value>>,
    calls: Mutex<Vec<Call>>,
    /// Record ids whose calls fail.
    failing_ids: Mutex<HashSet<String>>,
    unreachable: AtomicBool,
    gate: Option<Arc<Gate>>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn gated(gate: Arc<Gate>) -> Arc<Self> {
        Arc::new(Self {
            gate: Some(gate),
            ..Self::default()
        })
    }

    pub fn fail_id(&self, id: &str) {
        self.failing_ids.lock().unwrap().insert(id.to_string());
    }

    pub fn heal_id(&self, id: &str) {
        self.failing_ids.lock().unwrap().remove(id);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn record(&self, table: &str, id: &str) -> Option<Value> {
        self.records
            .lock()
            .unwrap()
            .get(&(table.to_string(), id.to_string()))
            .cloned()
    }

    async fn pass_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.acquire().await.unwrap().forget();
        }
    }

    fn check(&self, id: &str) -> BackendResult<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(BackendError::Network("connection refused".into()));
        }
        if self.failing_ids.lock().unwrap().contains(id) {
            return Err(BackendError::Rejected {
                status: 409,
                message: format!("conflict on {id}"),
            });
        }
        Ok(())
    }
}

fn record_id(record: &Value) -> String {
    match record.get("id") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn insert(&self, table: &str, record: &Value) -> BackendResult<()> {
        self.pass_gate().await;
        let id = record_id(record);
        self.calls.lock().unwrap().push(Call::Insert {
            table: table.into(),
            record: record.clone(),
        });
        self.check(&id)?;
        self.records
            .lock()
            .unwrap()
            .insert((table.into(), id), record.clone());
        Ok(())
    }

    async fn update(&self, table: &str, key: &MatchKey, record: &Value) -> BackendResult<()> {
        self.pass_gate().await;
        let id = key.value_text();
        self.calls.lock().unwrap().push(Call::Update {
            table: table.into(),
            key: id.clone(),
            record: record.clone(),
        });
        self.check(&id)?;
        let mut records = self.records.lock().unwrap();
        let entry = records
            .entry((table.into(), id))
            .or_insert_with(|| serde_json::json!({}));
        if let (Some(target), Some(patch)) = (entry.as_object_mut(), record.as_object()) {
            for (k, v) in patch {
                target.insert(k.clone(), v.clone());
            }
        }
        Ok(())
    }

    async fn delete(&self, table: &str, key: &MatchKey) -> BackendResult<()> {
        self.pass_gate().await;
        let id = key.value_text();
        self.calls.lock().unwrap().push(Call::Delete {
            table: table.into(),
            key: id.clone(),
        });
        self.check(&id)?;
        self.records.lock().unwrap().remove(&(table.into(), id));
        Ok(())
    }

    async fn ping(&self) -> BackendResult<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(BackendError::Network("connection refused".into()));
        }
        Ok(())
    }
}

// ── Failing Store ───────────────────────────────────────────────

/// Reads succeed (empty), writes fail.
pub struct ReadOnlyStore;

impl KvStore for ReadOnlyStore {
    fn get(&self, _key: &str) -> StorageResult<Option<String>> {
        Ok(None)
    }

    fn set(&self, _key: &str, _value: &str) -> StorageResult<()> {
        Err(StorageError::Unavailable("disk full".into()))
    }

    fn remove(&self, _key: &str) -> StorageResult<bool> {
        Ok(false)
    }

    fn entries(&self) -> StorageResult<Vec<(String, String)>> {
        Ok(Vec::new())
    }
}

// ── Helpers ─────────────────────────────────────────────────────

pub async fn memory_queue() -> OfflineQueue {
    OfflineQueue::open(Arc::new(MemoryKvStore::new())).await.unwrap()
}

pub fn test_config() -> SyncConfig {
    SyncConfig {
        debounce_ms: 50,
        interval_secs: 1,
        ..SyncConfig::default()
    }
}

pub async fn setup(backend: Arc<MockBackend>) -> (SyncCoordinator, OfflineQueue, Connectivity) {
    setup_with(backend, &test_config(), true).await
}

/// Routes crate logs to the test writer. Set `RUST_LOG` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub async fn setup_with(
    backend: Arc<MockBackend>,
    config: &SyncConfig,
    online: bool,
) -> (SyncCoordinator, OfflineQueue, Connectivity) {
    init_tracing();
    let queue = memory_queue().await;
    let connectivity = Connectivity::new(online);
    let coordinator = SyncCoordinator::new(queue.clone(), backend, connectivity.clone(), config);
    (coordinator, queue, connectivity)
}

/// Polls `check` until it holds or the timeout elapses.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
