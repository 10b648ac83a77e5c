//! Background worker that drains the queue on an interval.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::backoff::calculate_backoff_delay;
use crate::coordinator::SyncCoordinator;
use crate::transport::SyncTransport;

pub struct SyncWorker<T> {
    coordinator: Arc<SyncCoordinator<T>>,
    shutdown: Arc<Notify>,
}

/// Returned by [`SyncWorker::start`].
pub struct SyncWorkerHandle {
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl SyncWorkerHandle {
    /// Signal the worker and wait for it to stop. An in-progress cycle finishes first.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "sync worker task failed");
        }
    }
}

impl<T: SyncTransport + 'static> SyncWorker<T> {
    pub fn new(coordinator: Arc<SyncCoordinator<T>>) -> Self {
        Self {
            coordinator,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Run cycles until nothing is ready or a cycle makes no progress.
    ///
    /// Returns the number of acknowledged items.
    pub async fn sync_now(&self) -> anyhow::Result<usize> {
        drain(&self.coordinator).await
    }

    /// Spawn the loop.
    ///
    /// On every tick of `sync_interval` the queue is drained. Failed drains
    /// are retried after an exponential backoff while work remains ready.
    pub fn start(self) -> SyncWorkerHandle {
        let shutdown = self.shutdown.clone();
        let coordinator = self.coordinator.clone();

        let task = tokio::spawn(async move {
            let config = coordinator.config().clone();
            tracing::info!(interval = ?config.sync_interval, "sync worker started");

            // `interval` panics on a zero period.
            let period = config.sync_interval.max(Duration::from_millis(1));
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut consecutive_failures = 0u32;

            'worker: loop {
                tokio::select! {
                    _ = shutdown.notified() => break 'worker,
                    _ = ticker.tick() => {}
                }

                loop {
                    if !coordinator.has_ready_work() {
                        break;
                    }
                    match drain(&coordinator).await {
                        Ok(synced) => {
                            if synced > 0 {
                                tracing::info!(synced, "sync worker drained queue");
                            }
                            consecutive_failures = 0;
                            break;
                        }
                        Err(e) => {
                            consecutive_failures = consecutive_failures.saturating_add(1);
                            let backoff = calculate_backoff_delay(
                                consecutive_failures - 1,
                                config.base_delay,
                                config.max_delay,
                            );
                            let message = format!("{e:#}");
                            tracing::warn!(
                                failures = consecutive_failures,
                                ?backoff,
                                error = %message,
                                "sync failed; backing off"
                            );
                            tokio::select! {
                                _ = shutdown.notified() => break 'worker,
                                _ = tokio::time::sleep(backoff) => {}
                            }
                        }
                    }
                }
            }

            tracing::info!("sync worker stopped");
        });

        SyncWorkerHandle {
            shutdown: self.shutdown,
            task,
        }
    }
}

async fn drain<T: SyncTransport>(coordinator: &SyncCoordinator<T>) -> anyhow::Result<usize> {
    let mut synced = 0;
    loop {
        let report = coordinator
            .run_cycle()
            .await
            .context("sync cycle failed")?;
        if report.is_idle() || report.acknowledged.is_empty() {
            return Ok(synced);
        }
        synced += report.acknowledged.len();
    }
}
