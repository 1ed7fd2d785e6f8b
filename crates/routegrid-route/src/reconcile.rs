//! Reconcile loop: periodic sweep of the membership table followed by a
//! route recompute over the surviving entries.

use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use routegrid_cluster::MembershipTable;

use crate::controller::{RouteAction, RouteController};

/// Default interval between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(2);

/// Owns the route controller and drives it from the membership table.
pub struct Reconciler {
    membership: MembershipTable,
    controller: RouteController,
    interval: Duration,
}

impl Reconciler {
    pub fn new(membership: MembershipTable, controller: RouteController) -> Self {
        Self {
            membership,
            controller,
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    /// Set the sweep interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn controller(&self) -> &RouteController {
        &self.controller
    }

    /// Evict entries expired at `now`, then recompute the route.
    ///
    /// A failed route mutation is logged and reported as no action.
    pub async fn reconcile(&mut self, now: Instant) -> Option<RouteAction> {
        for identity in self.membership.sweep(now) {
            info!(%identity, "expiring connection");
        }

        let snapshot = self.membership.snapshot();
        match self.controller.recompute(&snapshot).await {
            Ok(action) => action,
            Err(e) => {
                error!(error = %e, "route update failed, will retry");
                None
            }
        }
    }

    /// Reconcile on every tick until shutdown, whether or not reports arrive.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = self.interval.as_secs(),
            ttl_secs = self.membership.ttl().as_secs(),
            "reconcile loop started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.reconcile(Instant::now()).await;
                }
                _ = shutdown.changed() => {
                    info!("reconcile loop shutting down");
                    break;
                }
            }
        }
    }
}
