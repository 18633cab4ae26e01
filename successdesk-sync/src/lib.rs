//! Offline operation queue and sync coordinator for SuccessDesk.
//!
//! Mutations made while the backend is unreachable (or whose call failed)
//! are queued durably and replayed later:
//! - [`OfflineQueue`]: durable FIFO-by-timestamp log of pending mutations
//! - [`ConnectivityMonitor`]: online/offline state and pending count for the UI
//! - [`SyncCoordinator`]: drains the queue, one cycle at a time
//! - [`SyncScheduler`]: real-time, interval or manual automatic triggers
//!
//! Items that keep failing are moved to a dead-letter list after
//! [`SyncConfig::max_attempts`] cycles.

pub mod backend;
pub mod config;
pub mod connectivity;
pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod scheduler;
pub mod types;

pub use backend::{Backend, BackendError, BackendResult, MatchKey};
pub use config::{SyncConfig, SyncFrequency};
pub use connectivity::{
    Connectivity, ConnectivityMonitor, ConnectivityState, MonitorHandle, MonitorSnapshot,
    ProbeHandle, ReachabilityProbe,
};
pub use coordinator::{
    CycleStatus, SkipReason, SyncCoordinator, SyncEvent, SyncOutcome, SyncReport, SyncStatus,
};
pub use error::{SyncError, SyncResult};
pub use metrics::SyncMetrics;
pub use queue::{OfflineQueue, QueueEvent};
pub use scheduler::{SchedulerCommand, SchedulerHandle, SyncScheduler};
pub use types::{DeadLetter, Operation, QueueItem};
