//! Periodic progress logging while a scan runs

use crate::proxy::scheduler::{ScanStats, StatsSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::info;

/// Default time between progress lines
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(60);

/// Samples [`ScanStats`] on a fixed interval until told the scan is done
pub struct ProgressReporter {
    stats: Arc<ScanStats>,
    interval: Duration,
}

impl ProgressReporter {
    pub fn new(stats: Arc<ScanStats>, interval: Duration) -> Self {
        Self {
            stats,
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    /// Log snapshots until `done` fires (or its sender is dropped), then log
    /// and return the final one
    pub async fn run(self, mut done: oneshot::Receiver<()>) -> StatsSnapshot {
        // First line after one full period, not at startup
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = self.stats.snapshot();
                    info!(
                        "Progress: {}/{} checked ({:.1}%), {} live",
                        snapshot.checked,
                        snapshot.total,
                        snapshot.percent(),
                        snapshot.live
                    );
                }
                _ = &mut done => break,
            }
        }

        let snapshot = self.stats.snapshot();
        info!(
            "Scan complete: {}/{} checked, {} live",
            snapshot.checked, snapshot.total, snapshot.live
        );
        snapshot
    }

    /// Spawn the reporter; send on the returned sender once the scan ends
    pub fn spawn(self) -> (oneshot::Sender<()>, tokio::task::JoinHandle<StatsSnapshot>) {
        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(self.run(rx));
        (tx, handle)
    }
}
