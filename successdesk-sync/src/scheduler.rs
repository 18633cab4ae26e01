//! Automatic sync triggers.
//!
//! Runs a `select!` loop that turns the coordinator's frequency setting
//! into sync attempts:
//! - **RealTime**: sync once the queue has been quiet for the debounce period
//! - **Interval**: sync on a fixed period
//! - **Manual**: no automatic triggers; only [`SchedulerHandle::trigger`]
//!
//! Cycles are spawned, so the loop keeps listening while one is in flight.
//! Overlapping triggers are rejected by the coordinator itself.

use crate::config::{SyncConfig, SyncFrequency};
use crate::coordinator::SyncCoordinator;
use crate::error::{SyncError, SyncResult};
use crate::queue::QueueEvent;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

/// Commands accepted by the scheduler.
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Start a sync now.
    Trigger,
    /// Stop the scheduler.
    Shutdown,
}

/// Handle for sending commands to a running scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    pub async fn trigger(&self) -> SyncResult<()> {
        self.command_tx
            .send(SchedulerCommand::Trigger)
            .await
            .map_err(|_| SyncError::ChannelClosed)
    }

    pub async fn shutdown(&self) -> SyncResult<()> {
        self.command_tx
            .send(SchedulerCommand::Shutdown)
            .await
            .map_err(|_| SyncError::ChannelClosed)
    }
}

/// Background task that fires syncs according to the configured frequency.
pub struct SyncScheduler {
    coordinator: SyncCoordinator,
    command_rx: mpsc::Receiver<SchedulerCommand>,
    frequency_rx: watch::Receiver<SyncFrequency>,
    queue_rx: broadcast::Receiver<QueueEvent>,
    interval: Duration,
    debounce: Duration,
}

impl SyncScheduler {
    /// Spawns the scheduler. The task exits on `Shutdown` or when every
    /// handle has been dropped.
    pub fn spawn(coordinator: SyncCoordinator, config: &SyncConfig) -> (SchedulerHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(16);
        let scheduler = SyncScheduler {
            frequency_rx: coordinator.watch_frequency(),
            queue_rx: coordinator.queue().subscribe(),
            coordinator,
            command_rx,
            interval: config.interval(),
            debounce: config.debounce(),
        };
        let task = tokio::spawn(scheduler.run());
        (SchedulerHandle { command_tx }, task)
    }

    async fn run(mut self) {
        let mut frequency = *self.frequency_rx.borrow_and_update();
        let mut queue_open = true;
        let mut ticker = new_ticker(self.interval);
        let mut debounce_deadline: Option<Instant> = None;

        info!("[SYNC] Scheduler started ({frequency})");

        loop {
            tokio::select! {
                _ = ticker.tick(), if frequency == SyncFrequency::Interval => {
                    debug!("[SYNC] Interval tick");
                    self.spawn_cycle();
                }
                event = self.queue_rx.recv(), if queue_open && frequency == SyncFrequency::RealTime => {
                    match event {
                        Ok(QueueEvent::Queued { .. }) | Err(broadcast::error::RecvError::Lagged(_)) => {
                            debounce_deadline = Some(Instant::now() + self.debounce);
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Closed) => queue_open = false,
                    }
                }
                _ = tokio::time::sleep_until(debounce_deadline.unwrap_or_else(Instant::now)),
                    if debounce_deadline.is_some() =>
                {
                    debounce_deadline = None;
                    debug!("[SYNC] Queue settled, syncing");
                    self.spawn_cycle();
                }
                changed = self.frequency_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    frequency = *self.frequency_rx.borrow_and_update();
                    debounce_deadline = None;
                    ticker = new_ticker(self.interval);
                    // Enqueues made under the old schedule are not replayed as new triggers.
                    self.queue_rx = self.queue_rx.resubscribe();
                }
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(SchedulerCommand::Trigger) => self.spawn_cycle(),
                        Some(SchedulerCommand::Shutdown) => {
                            info!("[SYNC] Scheduler stopping");
                            break;
                        }
                        None => {
                            info!("[SYNC] Command channel closed, stopping scheduler");
                            break;
                        }
                    }
                }
            }
        }
    }

    fn spawn_cycle(&self) {
        let coordinator = self.coordinator.clone();
        tokio::spawn(async move {
            coordinator.sync_now().await;
        });
    }
}

/// An interval whose first tick is one full period away.
fn new_ticker(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}
