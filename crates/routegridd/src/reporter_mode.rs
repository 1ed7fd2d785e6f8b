//! Reporter mode: runs on every node that can carry traffic.
//!
//! In this mode, the daemon:
//! 1. Generates an identity for the life of the process
//! 2. Runs the health probe on its own interval
//! 3. Sends a report to the aggregator every interval until shutdown

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use routegrid_cluster::report::new_identity;
use routegrid_cluster::{Reporter, ReporterConfig, SystemInterfaces};
use routegrid_health::HealthCollector;

/// Reporter settings resolved from the command line.
#[derive(Debug, Clone)]
pub struct ReporterSettings {
    pub server_host: String,
    pub port: u16,
    pub interface: String,
    pub health_check: PathBuf,
}

/// Run the reporter until shutdown.
pub async fn run_reporter(
    settings: ReporterSettings,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    info!("routegrid starting in reporter mode");

    let identity = new_identity();
    info!(%identity, interface = %settings.interface, "reporter identity assigned");

    // ── Health collector ─────────────────────────────────────────
    let (collector, health) = HealthCollector::new(settings.health_check.clone());
    let collector_shutdown = shutdown.clone();
    let collector_handle = tokio::spawn(async move {
        collector.run(collector_shutdown).await;
    });

    // ── Report loop ──────────────────────────────────────────────
    let mut config = ReporterConfig::new(settings.server_host, settings.interface);
    config.port = settings.port;
    let reporter = Reporter::new(config, identity, Arc::new(SystemInterfaces), health);
    reporter.run(shutdown).await;

    let _ = collector_handle.await;
    info!("reporter stopped");
    Ok(())
}
