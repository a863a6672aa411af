use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::types::{Job, Submission};
use super::workers::{JobQueue, release_reservation};
use crate::registry::{Registry, RegistryError};

/// Counts from one scheduling pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Monitors that were due this tick
    pub due: usize,
    /// Jobs accepted by the queue
    pub dispatched: usize,
    /// Jobs rejected by a full queue
    pub dropped: usize,
    /// Due monitors whose reservation could not be taken
    pub reservation_failed: usize,
}

/// Monitoring scheduler - periodically dispatches due monitors to the
/// worker pool.
///
/// There is exactly one scheduler per registry. A monitor is reserved
/// (`running = true`) before its job is submitted, which keeps a second job
/// for it from being dispatched until the first one has been cleaned up.
pub struct MonitoringScheduler {
    registry: Arc<dyn Registry>,
    queue: Arc<dyn JobQueue>,
    tick_interval: Duration,
}

impl MonitoringScheduler {
    pub fn new(registry: Arc<dyn Registry>, queue: Arc<dyn JobQueue>, tick_interval: Duration) -> Self {
        Self { registry, queue, tick_interval }
    }

    /// Spawn the scheduling loop onto the runtime
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// Tick until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) {
        info!("Starting monitor scheduler (tick every {:?})", self.tick_interval);

        let mut timer = interval(self.tick_interval);
        // A slow tick must not cause a burst of catch-up ticks
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Stopping monitor scheduler");
                    return;
                }
                _ = timer.tick() => {
                    match self.tick(SystemTime::now()).await {
                        Ok(report) if report.due > 0 => debug!("Scheduler tick: {:?}", report),
                        Ok(_) => {}
                        Err(e) => error!("Failed to get monitors for scheduling: {}", e),
                    }
                }
            }
        }
    }

    /// Run one scheduling pass as of `now`.
    ///
    /// Fails only when the monitor list cannot be read, in which case
    /// nothing was reserved or submitted.
    pub async fn tick(&self, now: SystemTime) -> Result<TickReport, RegistryError> {
        let monitors = self.registry.list_all().await?;
        let mut report = TickReport::default();

        for monitor in monitors.iter().filter(|m| m.is_due(now)) {
            report.due += 1;

            if let Err(e) = self.registry.set_running(monitor.id, true).await {
                // Reconsidered on the next tick
                debug!("Could not reserve monitor {}: {}", monitor.id, e);
                report.reservation_failed += 1;
                continue;
            }

            match self.queue.submit(Job::from(monitor)) {
                Submission::Queued => report.dispatched += 1,
                Submission::Dropped => {
                    report.dropped += 1;
                    // Nothing will run this job, so hand the monitor back.
                    // last_checked is untouched and it is due again next tick.
                    release_reservation(self.registry.as_ref(), monitor.id).await;
                }
            }
        }

        Ok(report)
    }
}
