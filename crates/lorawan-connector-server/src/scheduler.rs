use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::controller::Controller;

/// Runs a full sync on a fixed period, starting immediately.
pub struct PeriodicScheduler {
    controller: Arc<Controller>,
    period: Duration,
}

impl PeriodicScheduler {
    pub fn new(controller: Arc<Controller>, period: Duration) -> Self {
        Self { controller, period }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// Tick until `cancel` fires. A running pass is allowed to finish.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(period_secs = self.period.as_secs(), "Sync scheduler started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(errors) = self.controller.sync().await {
                error!(count = errors.len(), errors = %errors, "Periodic sync failed");
            }
        }

        info!("Sync scheduler stopped");
    }
}
