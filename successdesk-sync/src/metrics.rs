//! Process-wide sync counters.

use crate::coordinator::SyncReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Aggregate sync statistics since startup or the last reset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncMetrics {
    /// Cycles in which every attempted item replayed (including empty cycles).
    pub successful_syncs: u64,
    /// Cycles with at least one failed item, or that could not read the queue.
    pub failed_syncs: u64,
    pub last_successful_sync: Option<DateTime<Utc>>,
    /// Mean duration of successful cycles that replayed at least one item.
    pub average_duration_ms: f64,
    /// Samples behind `average_duration_ms`.
    pub timed_syncs: u64,
}

impl SyncMetrics {
    /// Folds a completed cycle into the counters.
    pub fn record(&mut self, report: &SyncReport) {
        if report.failed > 0 {
            self.failed_syncs += 1;
            return;
        }

        self.successful_syncs += 1;
        self.last_successful_sync = Some(report.finished_at);

        if report.attempted > 0 {
            let sample = report.duration.as_secs_f64() * 1000.0;
            self.timed_syncs += 1;
            self.average_duration_ms +=
                (sample - self.average_duration_ms) / self.timed_syncs as f64;
        }
    }

    /// Counts a cycle that could not run at all.
    pub fn record_failure(&mut self) {
        self.failed_syncs += 1;
    }

    pub fn average_duration(&self) -> Duration {
        Duration::from_secs_f64(self.average_duration_ms / 1000.0)
    }
}
