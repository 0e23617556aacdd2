//! Background reconciliation of the shared cache.
//!
//! Closing a connection only touches the local directory. Cache entries age
//! out instead: every pass re-publishes the live local sessions (resetting
//! their expiry), refreshes this node's membership heartbeat, prunes
//! expired fields from this node's buckets, and sweeps expired keys out of
//! backends that do not expire them on their own.

use std::sync::Arc;
use std::time::Duration;

use conduit_core::BrokerId;
use conduit_directory::{CacheError, SessionCache};
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::lifecycle::LifecycleController;
use crate::metrics::{RECONCILE_PRUNED_TOTAL, RECONCILE_RUNS_TOTAL, RECONCILE_SWEPT_TOTAL};

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// User entries re-published.
    pub users: usize,
    /// Group entries re-published.
    pub groups: usize,
    /// Expired fields removed.
    pub pruned: usize,
    /// Expired keys dropped from the backend.
    pub swept: usize,
}

/// Periodically re-publishes this node's sessions.
pub struct Reconciler {
    lifecycle: Arc<LifecycleController>,
    cache: SessionCache,
    broker: BrokerId,
    interval: Duration,
}

impl Reconciler {
    /// Create a reconciler that runs every `interval`.
    pub fn new(lifecycle: Arc<LifecycleController>, interval: Duration) -> Self {
        let cache = lifecycle.cache().clone();
        let broker = lifecycle.directory().broker_id().clone();
        Self {
            lifecycle,
            cache,
            broker,
            interval,
        }
    }

    /// Run one pass.
    pub async fn tick(&self) -> Result<ReconcileReport, CacheError> {
        self.cache.register_broker(&self.broker).await?;
        let (users, groups) = self.lifecycle.republish().await?;
        let pruned = self.cache.prune_expired(&self.broker).await?;
        let swept = self.cache.purge_store().await?;
        Ok(ReconcileReport {
            users,
            groups,
            pruned,
            swept,
        })
    }

    /// Run a pass immediately and then every interval until `token` is
    /// cancelled. On cancellation the node leaves the broker membership.
    pub async fn run(self, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(broker_id = %self.broker, interval_secs = self.interval.as_secs(), "reconciler started");

        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(report) => {
                            counter!(RECONCILE_RUNS_TOTAL, "outcome" => "ok").increment(1);
                            counter!(RECONCILE_PRUNED_TOTAL).increment(report.pruned as u64);
                            counter!(RECONCILE_SWEPT_TOTAL).increment(report.swept as u64);
                            debug!(
                                users = report.users,
                                groups = report.groups,
                                pruned = report.pruned,
                                swept = report.swept,
                                "reconciled"
                            );
                        }
                        Err(e) => {
                            counter!(RECONCILE_RUNS_TOTAL, "outcome" => "error").increment(1);
                            warn!(error = %e, "reconciliation failed");
                        }
                    }
                }
            }
        }

        match self.cache.deregister_broker(&self.broker).await {
            Ok(_) => info!(broker_id = %self.broker, "left broker membership"),
            Err(e) => warn!(error = %e, "failed to leave broker membership"),
        }
    }
}
