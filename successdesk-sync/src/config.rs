//! Sync configuration.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// How automatic sync triggers are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncFrequency {
    /// Sync shortly after every enqueue (debounced).
    #[default]
    RealTime,
    /// Sync on a fixed period.
    Interval,
    /// Only explicit triggers and reconnection.
    Manual,
}

impl fmt::Display for SyncFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncFrequency::RealTime => write!(f, "real-time"),
            SyncFrequency::Interval => write!(f, "interval"),
            SyncFrequency::Manual => write!(f, "manual"),
        }
    }
}

/// Configuration for the offline queue and sync coordinator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Initial trigger schedule. Can be changed at runtime.
    pub frequency: SyncFrequency,

    /// Period between syncs in `Interval` mode (seconds).
    pub interval_secs: u64,

    /// Quiet period after an enqueue before a `RealTime` sync fires (milliseconds).
    pub debounce_ms: u64,

    /// Failed replays before an item is moved to the dead-letter list.
    /// `0` keeps failing items queued forever.
    pub max_attempts: u32,

    /// Record field used to match UPDATE and DELETE targets.
    pub id_field: String,

    /// Period of the backend reachability probe (seconds).
    pub probe_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            frequency: SyncFrequency::RealTime,
            interval_secs: 300,
            debounce_ms: 2_000,
            max_attempts: 5,
            id_field: "id".to_string(),
            probe_interval_secs: 30,
        }
    }
}

impl SyncConfig {
    /// Parses a config from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> SyncResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.interval_secs == 0 {
            return Err(SyncError::Config("interval_secs must be greater than 0".into()));
        }
        if self.probe_interval_secs == 0 {
            return Err(SyncError::Config(
                "probe_interval_secs must be greater than 0".into(),
            ));
        }
        if self.id_field.trim().is_empty() {
            return Err(SyncError::Config("id_field must not be empty".into()));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }
}
