//! Queue data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

use crate::backend::MatchKey;

/// Mutation kind carried by a queued item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Insert => write!(f, "INSERT"),
            Operation::Update => write!(f, "UPDATE"),
            Operation::Delete => write!(f, "DELETE"),
        }
    }
}

/// One pending mutation awaiting replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub table: String,
    pub operation: Operation,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    /// Enqueue order within this queue. Breaks timestamp ties.
    #[serde(default)]
    pub sequence: u64,
}

impl QueueItem {
    /// Extracts the record identifier used to match UPDATE and DELETE.
    pub fn match_key(&self, field: &str) -> Option<MatchKey> {
        match self.data.get(field) {
            None | Some(Value::Null) => None,
            Some(value) => Some(MatchKey::new(field, value.clone())),
        }
    }

    /// Replay order: timestamp ascending, then enqueue sequence.
    pub fn replay_order(a: &QueueItem, b: &QueueItem) -> Ordering {
        a.timestamp
            .cmp(&b.timestamp)
            .then(a.sequence.cmp(&b.sequence))
    }
}

/// An item that exhausted its replay attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub item: QueueItem,
    pub attempts: u32,
    pub last_error: String,
    pub failed_at: DateTime<Utc>,
}
