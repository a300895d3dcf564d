//! Background quota watch.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::monitor::{QuotaMonitor, QuotaStatus};

/// Check the quota every `interval` and publish each reading.
///
/// The watch only observes; cleanup runs from
/// [`QuotaMonitor::safe_set_item`]. The task ends once every receiver has
/// been dropped.
pub fn spawn_quota_watch(
    monitor: Arc<QuotaMonitor>,
    interval: Duration,
) -> (JoinHandle<()>, watch::Receiver<QuotaStatus>) {
    let (tx, rx) = watch::channel(QuotaStatus::default());
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = tx.closed() => break,
            }
            match monitor.check_quota().await {
                Ok(status) => {
                    if status.is_full {
                        warn!(percentage = status.percentage, available = status.available_bytes, "cache is full");
                    } else if status.is_near_limit {
                        warn!(percentage = status.percentage, "cache is near its quota");
                    }
                    if tx.send(status).is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "quota check failed"),
            }
        }
        debug!("quota watch stopped");
    });
    (handle, rx)
}
