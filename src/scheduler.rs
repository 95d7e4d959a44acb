use crate::scanner::ScanCycle;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Background loop running scan cycles on a fixed interval.
///
/// The first cycle starts immediately. Cycles run one after another on a
/// single task, so they never overlap; ticks missed while a cycle is still
/// running are skipped rather than queued.
#[derive(Debug)]
pub struct Scheduler {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn spawn(cycle: Arc<ScanCycle>, interval: Duration, cancel: CancellationToken) -> Self {
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            info!(?interval, "scheduler started");
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        cycle.run(&token).await;
                    }
                }
            }
            info!("scheduler stopped");
        });
        Self { handle, cancel }
    }

    /// Stop the loop, cutting short any cycle in progress, and wait for it to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "scheduler task ended abnormally");
        }
    }
}
