/// Timeout reaper
///
/// Periodically expires asynchronous calls whose timeout has elapsed and
/// completes them with `CallResult::Timeout`. Blocking and future calls
/// time themselves out and are left alone.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::call::CallOutcome;
use crate::transport::pending::PendingTable;

/// One reaping pass at `now`; returns how many calls timed out
pub fn sweep(table: &PendingTable, now: Instant) -> usize {
    let expired = table.reap_expired(now);
    let count = expired.len();
    for call in expired {
        tracing::debug!("[REAP] Call timed out after {:?}: {}", call.timeout(), call.key());
        call.complete(CallOutcome::timeout());
    }
    count
}

/// Handle to a running reaper task
#[derive(Debug)]
pub struct ReaperHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ReaperHandle {
    /// Spawn the reaper on the current tokio runtime
    ///
    /// The task stops when `cancel` (or a parent token) is cancelled.
    pub fn spawn(table: Arc<PendingTable>, interval: Duration, cancel: CancellationToken) -> Self {
        let handle = tokio::spawn(run(table, interval, cancel.clone()));
        Self { cancel, handle }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the reaper and wait for the task to exit
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!("Reaper task ended abnormally: {}", e);
        }
    }
}

async fn run(table: Arc<PendingTable>, interval: Duration, cancel: CancellationToken) {
    tracing::info!("Reaper started, interval {:?}", interval);

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                sweep(&table, Instant::now());
            }
        }
    }

    tracing::info!("Reaper stopped, {} call(s) still pending", table.len());
}
