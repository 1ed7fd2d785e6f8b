//! Aggregator mode: runs on the routing host.
//!
//! In this mode, the daemon:
//! 1. Waits for the route device to come up
//! 2. Binds the report listener
//! 3. Starts the reconcile loop (sweep expired members, recompute the route)
//! 4. Accepts reports until shutdown

use std::net::{IpAddr, SocketAddr};

use anyhow::Context;
use tokio::sync::watch;
use tracing::info;

use routegrid_cluster::iface::INTERFACE_POLL_INTERVAL;
use routegrid_cluster::{MembershipTable, ReportServer, SystemInterfaces, wait_for_interface};
use routegrid_health::HealthParser;
use routegrid_route::{Reconciler, RouteController, platform_applier};

/// Aggregator settings resolved from the command line.
#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    pub bind: IpAddr,
    pub port: u16,
    pub route_device: String,
    pub route_table: String,
    pub tunnel_marker: String,
    pub dry_run: bool,
}

/// Run the aggregator until shutdown.
pub async fn run_aggregator(
    settings: AggregatorSettings,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    info!("routegrid starting in aggregator mode");

    // ── Route device ─────────────────────────────────────────────
    let Some(device_addr) = wait_for_interface(
        &SystemInterfaces,
        &settings.route_device,
        INTERFACE_POLL_INTERVAL,
        shutdown.clone(),
    )
    .await
    else {
        info!("shutdown while waiting for route device");
        return Ok(());
    };
    info!(device = %settings.route_device, addr = %device_addr, "route device ready");

    // ── Report listener ──────────────────────────────────────────
    let membership = MembershipTable::new();
    let addr = SocketAddr::new(settings.bind, settings.port);
    let server = ReportServer::bind(addr, membership.clone())
        .await
        .with_context(|| format!("bind report listener on {addr}"))?;

    // ── Route controller ─────────────────────────────────────────
    let applier = platform_applier(&settings.route_table, settings.dry_run);
    let controller = RouteController::new(applier, settings.route_device.clone())
        .with_parser(HealthParser::new(settings.tunnel_marker.clone()));
    let mut reconciler = Reconciler::new(membership, controller);
    info!(
        table = %settings.route_table,
        marker = %settings.tunnel_marker,
        dry_run = settings.dry_run,
        "route controller initialized"
    );

    let reconcile_shutdown = shutdown.clone();
    let reconcile_handle = tokio::spawn(async move {
        reconciler.run(reconcile_shutdown).await;
    });

    // ── Accept loop ──────────────────────────────────────────────
    server.run(shutdown).await;

    let _ = reconcile_handle.await;
    info!("aggregator stopped");
    Ok(())
}
