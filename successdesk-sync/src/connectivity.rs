//! Connectivity signal and monitor.
//!
//! [`Connectivity`] is the host's online/offline signal. The
//! [`ConnectivityMonitor`] task watches it together with the queue and
//! the coordinator, publishes a [`MonitorSnapshot`] for the UI, and fires
//! one sync on every offline → online transition.

use crate::backend::Backend;
use crate::config::SyncConfig;
use crate::coordinator::{SyncCoordinator, SyncEvent, SyncOutcome};
use crate::queue::QueueEvent;
use crate::types::QueueItem;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Latest connectivity reading.
///
/// `reconnects` counts offline → online transitions, so a watcher that
/// only wakes after an off/on flap still sees that a reconnect happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectivityState {
    pub online: bool,
    pub reconnects: u64,
}

/// Shared online/offline flag. Clones observe the same value.
#[derive(Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<ConnectivityState>>,
}

impl Connectivity {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _) = watch::channel(ConnectivityState {
            online: initially_online,
            reconnects: 0,
        });
        Self { tx: Arc::new(tx) }
    }

    /// Reports a connectivity change. Repeating the current value is a no-op.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|state| {
            if state.online == online {
                return false;
            }
            state.online = online;
            if online {
                state.reconnects += 1;
            }
            true
        });
        if changed {
            info!("[NET] Connectivity changed: {}", if online { "online" } else { "offline" });
        }
    }

    pub fn is_online(&self) -> bool {
        self.tx.borrow().online
    }

    pub fn state(&self) -> ConnectivityState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.tx.subscribe()
    }
}

/// What the UI needs to render connectivity and the pending badge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorSnapshot {
    pub is_online: bool,
    pub pending_operations: Vec<QueueItem>,
}

impl MonitorSnapshot {
    pub fn pending_operations_count(&self) -> usize {
        self.pending_operations.len()
    }
}

/// Spawns the connectivity monitor task.
pub struct ConnectivityMonitor;

impl ConnectivityMonitor {
    /// Starts watching `coordinator`'s connectivity, queue and sync events.
    /// The task stops when the returned handle is shut down or dropped.
    pub fn spawn(coordinator: SyncCoordinator) -> MonitorHandle {
        let connectivity = coordinator.connectivity().clone();
        let (snapshot_tx, snapshot_rx) = watch::channel(MonitorSnapshot {
            is_online: connectivity.is_online(),
            pending_operations: Vec::new(),
        });

        // Subscribe before spawning so no transition or queue event is missed.
        let online = connectivity.subscribe();
        let seen_reconnects = online.borrow().reconnects;
        let listeners = Listeners {
            seen_reconnects,
            online,
            queue: coordinator.queue().subscribe(),
            sync: coordinator.subscribe(),
        };
        let task = tokio::spawn(run_monitor(coordinator.clone(), listeners, snapshot_tx));

        MonitorHandle {
            coordinator,
            snapshot: snapshot_rx,
            task,
        }
    }
}

/// Handle to a running monitor. Dropping it stops the task.
pub struct MonitorHandle {
    coordinator: SyncCoordinator,
    snapshot: watch::Receiver<MonitorSnapshot>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn is_online(&self) -> bool {
        self.snapshot.borrow().is_online
    }

    pub fn pending_operations_count(&self) -> usize {
        self.snapshot.borrow().pending_operations_count()
    }

    pub fn pending_operations(&self) -> Vec<QueueItem> {
        self.snapshot.borrow().pending_operations.clone()
    }

    /// Latest snapshot plus change notifications.
    pub fn subscribe(&self) -> watch::Receiver<MonitorSnapshot> {
        self.snapshot.clone()
    }

    /// Manual sync entry point.
    pub async fn trigger_sync(&self) -> SyncOutcome {
        self.coordinator.sync_now().await
    }

    /// Stops the monitor and waits for it to exit.
    pub async fn shutdown(mut self) {
        self.task.abort();
        let _ = (&mut self.task).await;
        debug!("[NET] Connectivity monitor stopped");
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Listeners {
    seen_reconnects: u64,
    online: watch::Receiver<ConnectivityState>,
    queue: broadcast::Receiver<QueueEvent>,
    sync: broadcast::Receiver<SyncEvent>,
}

async fn run_monitor(
    coordinator: SyncCoordinator,
    listeners: Listeners,
    snapshot: watch::Sender<MonitorSnapshot>,
) {
    let Listeners {
        mut seen_reconnects,
        online: mut online_rx,
        queue: mut queue_rx,
        sync: mut sync_rx,
    } = listeners;

    refresh_pending(&coordinator, &snapshot).await;

    loop {
        tokio::select! {
            changed = online_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *online_rx.borrow_and_update();
                snapshot.send_modify(|s| s.is_online = state.online);

                // Flaps that happened before we woke up collapse into one cycle.
                if state.online && state.reconnects > seen_reconnects {
                    info!("[NET] Back online, starting sync");
                    let coordinator = coordinator.clone();
                    tokio::spawn(async move {
                        coordinator.sync_now().await;
                    });
                }
                seen_reconnects = state.reconnects;
            }
            event = queue_rx.recv() => {
                match event {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        refresh_pending(&coordinator, &snapshot).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            event = sync_rx.recv() => {
                match event {
                    Ok(SyncEvent::Completed(_)) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        refresh_pending(&coordinator, &snapshot).await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

async fn refresh_pending(coordinator: &SyncCoordinator, snapshot: &watch::Sender<MonitorSnapshot>) {
    match coordinator.queue().list_pending().await {
        Ok(items) => snapshot.send_modify(|s| s.pending_operations = items),
        Err(e) => warn!("[NET] Could not refresh pending operations: {e}"),
    }
}

/// Periodically pings the backend and feeds the result into [`Connectivity`].
pub struct ReachabilityProbe;

impl ReachabilityProbe {
    /// Pings once immediately, then every [`SyncConfig::probe_interval`].
    pub fn spawn(
        connectivity: Connectivity,
        backend: Arc<dyn Backend>,
        config: &SyncConfig,
    ) -> ProbeHandle {
        let interval = config.probe_interval();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match backend.ping().await {
                    Ok(()) => connectivity.set_online(true),
                    Err(e) => {
                        debug!("[NET] Backend unreachable: {e}");
                        connectivity.set_online(false);
                    }
                }
            }
        });
        ProbeHandle { task }
    }
}

/// Handle to a running probe. Dropping it stops the probe.
pub struct ProbeHandle {
    task: JoinHandle<()>,
}

impl Drop for ProbeHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
