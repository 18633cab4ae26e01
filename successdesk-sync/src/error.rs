//! Sync error types.

use crate::backend::BackendError;
use successdesk_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in the offline queue and sync coordinator.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("invalid queue item: {0}")]
    InvalidItem(String),

    #[error("missing match key `{field}` for {operation} on {table}")]
    MissingKey {
        table: String,
        operation: String,
        field: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("background task failed: {0}")]
    Task(String),

    #[error("sync scheduler not running")]
    ChannelClosed,
}
