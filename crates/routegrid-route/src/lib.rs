//! routegrid-route: failover routing for routegrid.
//!
//! Turns the aggregator's membership table into a single multipath
//! default route through every node with a live tunnel, and programs it
//! into the kernel only when it changes.
//!
//! # Components
//!
//! - **`controller`**: derives the route and diffs it against the last applied one
//! - **`applier`**: `ip route` replace / delete / cache flush, or a logging dry run
//! - **`reconcile`**: the periodic sweep-then-recompute loop

pub mod applier;
pub mod controller;
pub mod reconcile;

pub use applier::{
    DryRunApplier, IpRouteApplier, RouteApplier, RouteCommand, RouteError, platform_applier,
};
pub use controller::{RouteAction, RouteController, nexthop_clause};
pub use reconcile::Reconciler;
