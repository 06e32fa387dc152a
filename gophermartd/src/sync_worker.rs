//! Sync worker: runs reconciliation cycles on a fixed period.
//!
//! The first cycle starts immediately. A cycle that overruns the period
//! delays the next one instead of triggering catch-up cycles, so cycles
//! never overlap.

use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use gophermart_store::Store;
use gophermart_sync::{AccrualPort, Reconciler};

use crate::error::DaemonResult;

/// Periodic driver for the reconciler.
pub struct SyncWorker<A: AccrualPort + 'static, S: Store + 'static> {
    reconciler: Reconciler<A, S>,
    period: Duration,
}

impl<A: AccrualPort + 'static, S: Store + 'static> SyncWorker<A, S> {
    /// Create a new sync worker.
    pub fn new(reconciler: Reconciler<A, S>, period: Duration) -> Self {
        Self { reconciler, period }
    }

    /// Run the worker loop.
    ///
    /// Returns when shutdown is signaled via cancellation token. The token is
    /// also handed to each cycle so a running cycle stops at the next order.
    pub async fn run(self, shutdown: CancellationToken) -> DaemonResult<()> {
        info!(period_secs = self.period.as_secs(), "Sync worker started");

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Sync worker shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    match self.reconciler.run_cycle(&shutdown).await {
                        Ok(report) => {
                            debug!(examined = report.examined, "Sync tick done");
                        }
                        Err(e) => {
                            error!(error = %e, "Reconciliation cycle failed (will retry)");
                        }
                    }
                }
            }
        }

        info!("Sync worker stopped");
        Ok(())
    }
}
