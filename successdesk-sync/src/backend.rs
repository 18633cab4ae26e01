//! Remote data store seam.
//!
//! The coordinator only needs three verbs per table. Transport, auth and
//! retries belong to the implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Result type for backend calls.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors reported by a backend. All of them are retryable from the
/// coordinator's point of view.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("network error: {0}")]
    Network(String),

    #[error("backend rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Identifies the record an UPDATE or DELETE applies to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchKey {
    pub column: String,
    pub value: Value,
}

impl MatchKey {
    pub fn new(column: impl Into<String>, value: Value) -> Self {
        Self {
            column: column.into(),
            value,
        }
    }

    /// Returns the key value as plain text (strings unquoted).
    pub fn value_text(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for MatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.column, self.value_text())
    }
}

/// The remote data store that queued operations are replayed against.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Creates a record.
    async fn insert(&self, table: &str, record: &Value) -> BackendResult<()>;

    /// Updates the record matched by `key`.
    async fn update(&self, table: &str, key: &MatchKey, record: &Value) -> BackendResult<()>;

    /// Deletes the record matched by `key`.
    async fn delete(&self, table: &str, key: &MatchKey) -> BackendResult<()>;

    /// Cheap reachability check used by the connectivity probe.
    async fn ping(&self) -> BackendResult<()> {
        Ok(())
    }
}
