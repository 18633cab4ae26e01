//! Key-value store trait and its DuckDB implementation.

use crate::error::StorageResult;
use duckdb::{Connection, params};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

/// The queue holds a handful of small JSON rows; keep DuckDB from sizing
/// its buffer pool and worker threads for analytics.
const MEMORY_LIMIT: &str = "64MB";
const THREADS: u32 = 1;

/// Durable string key-value store.
///
/// Implementations are synchronous. Async callers are expected to move
/// calls onto a blocking thread (`tokio::task::spawn_blocking`).
pub trait KvStore: Send + Sync {
    /// Reads the value stored under `key`.
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Writes `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Deletes `key`. Returns `false` if it was not present.
    fn remove(&self, key: &str) -> StorageResult<bool>;

    /// Returns every entry, ordered by key.
    fn entries(&self) -> StorageResult<Vec<(String, String)>>;

    /// Returns the entries whose key starts with `prefix`, ordered by key.
    fn entries_with_prefix(&self, prefix: &str) -> StorageResult<Vec<(String, String)>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .collect())
    }

    /// Deletes every entry whose key starts with `prefix`, returning how many were removed.
    fn clear_prefix(&self, prefix: &str) -> StorageResult<usize> {
        let mut removed = 0;
        for (key, _) in self.entries_with_prefix(prefix)? {
            if self.remove(&key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// DuckDB-backed key-value store.
#[derive(Clone)]
pub struct DuckKvStore {
    conn: Arc<Mutex<Connection>>,
}

impl DuckKvStore {
    /// Opens or creates a store at the given path.
    ///
    /// A queue file left behind by a crash can carry a WAL that DuckDB
    /// refuses to replay. In that case the WAL is dropped and the open is
    /// retried once; writes that never reached a checkpoint are lost.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = match Connection::open(path) {
            Ok(conn) => conn,
            Err(err) => {
                let wal = wal_path(path);
                if !wal.exists() {
                    return Err(err.into());
                }
                warn!(
                    "[STORE] Could not open {} ({err}), discarding WAL {}",
                    path.display(),
                    wal.display()
                );
                std::fs::remove_file(&wal).map_err(|_| err)?;
                Connection::open(path)?
            }
        };
        cap_resources(&conn)?;
        initialize_kv_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_kv_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!("[STORE] recovering from poisoned mutex");
            poisoned.into_inner()
        })
    }

    /// Flushes the WAL into the main database file.
    pub fn checkpoint(&self) -> StorageResult<()> {
        self.lock_conn().execute_batch("CHECKPOINT")?;
        Ok(())
    }
}

impl KvStore for DuckKvStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let conn = self.lock_conn();
        let result = conn.query_row(
            "SELECT value FROM kv WHERE key = ?",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let conn = self.lock_conn();
        conn.execute(
            r#"
            INSERT INTO kv (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT (key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![key, value, chrono::Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<bool> {
        let conn = self.lock_conn();
        let deleted = conn.execute("DELETE FROM kv WHERE key = ?", params![key])?;
        Ok(deleted > 0)
    }

    fn entries(&self) -> StorageResult<Vec<(String, String)>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare("SELECT key, value FROM kv ORDER BY key")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn entries_with_prefix(&self, prefix: &str) -> StorageResult<Vec<(String, String)>> {
        let conn = self.lock_conn();
        let mut stmt =
            conn.prepare("SELECT key, value FROM kv WHERE starts_with(key, ?) ORDER BY key")?;
        let rows = stmt
            .query_map(params![prefix], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn clear_prefix(&self, prefix: &str) -> StorageResult<usize> {
        let conn = self.lock_conn();
        let deleted = conn.execute("DELETE FROM kv WHERE starts_with(key, ?)", params![prefix])?;
        Ok(deleted)
    }
}

/// DuckDB writes its log next to the database as `<file>.wal`.
fn wal_path(path: &Path) -> PathBuf {
    let mut wal = OsString::from(path.as_os_str());
    wal.push(".wal");
    PathBuf::from(wal)
}

fn cap_resources(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(&format!(
        "SET memory_limit = '{MEMORY_LIMIT}'; SET threads = {THREADS};"
    ))?;
    Ok(())
}

fn initialize_kv_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS kv (
            key VARCHAR PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at BIGINT NOT NULL
        );
        "#,
    )?;
    Ok(())
}
