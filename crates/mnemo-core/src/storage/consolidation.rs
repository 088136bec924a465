//! Background consolidation ("sleep update") on its own tokio task.

use std::sync::Arc;
use std::time::Duration;

use mnemo_adapters::UpdateAdapter;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::manager::StorageManager;
use super::ConsolidationReport;
use crate::resilience::Guarded;

/// Handle to a running consolidation loop. Dropping it stops the loop.
pub struct ConsolidationJob {
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl ConsolidationJob {
    /// Run `manager.consolidate(update)` every `interval`, first tick after
    /// one full interval. `on_change` runs after every pass that changed
    /// something. Failures are logged and the loop keeps going.
    pub fn spawn<F>(
        manager: Arc<StorageManager>,
        update: Arc<Guarded<dyn UpdateAdapter>>,
        interval: Duration,
        on_change: F,
    ) -> Self
    where
        F: Fn(&ConsolidationReport) + Send + 'static,
    {
        let (shutdown, mut stop) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(interval_secs = interval.as_secs(), "consolidation job started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match manager.consolidate(&update).await {
                            Ok(report) if report.is_empty() => debug!("consolidation: nothing to do"),
                            Ok(report) => on_change(&report),
                            Err(err) => warn!(error = %err, "consolidation pass failed"),
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("consolidation job stopped");
        });
        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Signal the loop to stop and wait for it. A pass in progress finishes
    /// first.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "consolidation task ended abnormally");
            }
        }
    }
}

impl Drop for ConsolidationJob {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
