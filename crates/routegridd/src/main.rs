//! routegridd: the routegrid daemon.
//!
//! Single binary with two roles:
//! - Aggregator (`--server`): collects node reports and programs the
//!   multipath default route through nodes with a live tunnel
//! - Reporter (`--client`): runs the health probe and pushes reports to
//!   the aggregator
//!
//! # Usage
//!
//! ```text
//! routegridd --server --routeDevice eth1
//! routegridd --client --serverHost 10.0.0.10
//! ```

mod aggregator_mode;
mod logging;
mod reporter_mode;

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{ArgGroup, Parser};
use tokio::sync::watch;
use tracing::info;

use routegrid_cluster::server::DEFAULT_REPORT_PORT;
use routegrid_health::checker::DEFAULT_TUNNEL_MARKER;
use routegrid_route::applier::DEFAULT_ROUTE_TABLE;
use routegrid_route::controller::DEFAULT_ROUTE_DEVICE;

use crate::aggregator_mode::AggregatorSettings;
use crate::reporter_mode::ReporterSettings;

#[cfg(target_os = "macos")]
const DEFAULT_INTERFACE: &str = "en0";
#[cfg(not(target_os = "macos"))]
const DEFAULT_INTERFACE: &str = "eth0";

#[derive(Parser, Debug)]
#[command(
    name = "routegridd",
    about = "Heartbeat-driven failover routing daemon",
    group(ArgGroup::new("role").required(true).args(["server", "client"]))
)]
struct Cli {
    /// Run as the aggregator: collect reports and program routes.
    #[arg(long)]
    server: bool,

    /// Run as a reporter: probe tunnel health and report it.
    #[arg(long, requires = "server_host")]
    client: bool,

    /// Aggregator host to report to.
    #[arg(long = "serverHost", value_name = "HOST")]
    server_host: Option<String>,

    /// Address the aggregator listens on.
    #[arg(long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Report port.
    #[arg(long, default_value_t = DEFAULT_REPORT_PORT)]
    port: u16,

    /// Interface whose IPv4 address a reporter advertises.
    #[arg(long, default_value = DEFAULT_INTERFACE)]
    interface: String,

    /// Egress device for next hops; the aggregator waits for it at startup.
    #[arg(long = "routeDevice", default_value = DEFAULT_ROUTE_DEVICE)]
    route_device: String,

    /// Routing table that holds the multipath default route.
    #[arg(long = "routeTable", default_value = DEFAULT_ROUTE_TABLE)]
    route_table: String,

    /// Marker identifying the tunnel count line in probe output.
    #[arg(long = "tunnelMarker", default_value = DEFAULT_TUNNEL_MARKER)]
    tunnel_marker: String,

    /// Health probe executable.
    #[arg(long = "healthCheck", default_value = "./health_check.sh")]
    health_check: PathBuf,

    /// Directory for log files.
    #[arg(long = "logDir", default_value = "/var/log/routegrid")]
    log_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error). RUST_LOG overrides it.
    #[arg(long = "logLevel", default_value = "info")]
    log_level: String,

    /// Log route changes instead of applying them.
    #[arg(long = "dryRun")]
    dry_run: bool,
}

/// Resolved role and its settings.
#[derive(Debug)]
enum Role {
    Aggregator(AggregatorSettings),
    Reporter(ReporterSettings),
}

impl Role {
    fn name(&self) -> &'static str {
        match self {
            Role::Aggregator(_) => "server",
            Role::Reporter(_) => "client",
        }
    }
}

impl Cli {
    fn into_role(self) -> anyhow::Result<Role> {
        if self.server {
            return Ok(Role::Aggregator(AggregatorSettings {
                bind: self.bind,
                port: self.port,
                route_device: self.route_device,
                route_table: self.route_table,
                tunnel_marker: self.tunnel_marker,
                dry_run: self.dry_run,
            }));
        }

        let server_host = self
            .server_host
            .ok_or_else(|| anyhow::anyhow!("--client requires --serverHost"))?;
        Ok(Role::Reporter(ReporterSettings {
            server_host,
            port: self.port,
            interface: self.interface,
            health_check: self.health_check,
        }))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log_dir = cli.log_dir.clone();
    let log_level = cli.log_level.clone();
    let role = cli.into_role()?;

    logging::init(&log_dir, role.name(), &log_level)?;
    info!(role = role.name(), config = ?role, "routegrid starting");

    // ── Shutdown signal ────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal = shutdown_signal()?;
    tokio::spawn(async move {
        match signal.await {
            Ok(()) => info!("shutdown signal received"),
            Err(e) => tracing::error!(error = %e, "signal handler failed, shutting down"),
        }
        let _ = shutdown_tx.send(true);
    });

    match role {
        Role::Aggregator(settings) => aggregator_mode::run_aggregator(settings, shutdown_rx).await?,
        Role::Reporter(settings) => reporter_mode::run_reporter(settings, shutdown_rx).await?,
    }

    info!("routegrid stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
///
/// Handlers are installed before returning so a failure to install is a
/// startup error.
#[cfg(unix)]
fn shutdown_signal() -> std::io::Result<impl Future<Output = std::io::Result<()>>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    Ok(async move {
        tokio::select! {
            r = tokio::signal::ctrl_c() => r,
            _ = terminate.recv() => Ok(()),
        }
    })
}

/// Resolves on Ctrl-C.
#[cfg(not(unix))]
fn shutdown_signal() -> std::io::Result<impl Future<Output = std::io::Result<()>>> {
    Ok(tokio::signal::ctrl_c())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("routegridd").chain(args.iter().copied()))
    }

    #[test]
    fn server_role_with_defaults() {
        let role = parse(&["--server"]).unwrap().into_role().unwrap();
        match role {
            Role::Aggregator(s) => {
                assert_eq!(s.port, 8019);
                assert_eq!(s.route_device, "eth1");
                assert_eq!(s.route_table, "workspaces");
                assert_eq!(s.tunnel_marker, "sshuttle");
                assert_eq!(s.bind, "0.0.0.0".parse::<IpAddr>().unwrap());
                assert!(!s.dry_run);
            }
            other => panic!("unexpected role: {other:?}"),
        }
    }

    #[test]
    fn client_role_requires_server_host() {
        assert!(parse(&["--client"]).is_err());

        let role = parse(&["--client", "--serverHost", "10.0.0.10"])
            .unwrap()
            .into_role()
            .unwrap();
        match role {
            Role::Reporter(s) => {
                assert_eq!(s.server_host, "10.0.0.10");
                assert_eq!(s.port, 8019);
                assert_eq!(s.health_check, PathBuf::from("./health_check.sh"));
            }
            other => panic!("unexpected role: {other:?}"),
        }
    }

    #[test]
    fn a_role_is_required() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["--logLevel", "debug"]).is_err());
    }

    #[test]
    fn roles_are_mutually_exclusive() {
        assert!(parse(&["--server", "--client", "--serverHost", "h"]).is_err());
    }

    #[test]
    fn overrides() {
        let cli = parse(&[
            "--server",
            "--port",
            "9000",
            "--routeDevice",
            "bond0",
            "--dryRun",
            "--logLevel",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.log_level, "debug");

        match cli.into_role().unwrap() {
            Role::Aggregator(s) => {
                assert_eq!(s.port, 9000);
                assert_eq!(s.route_device, "bond0");
                assert!(s.dry_run);
            }
            other => panic!("unexpected role: {other:?}"),
        }
    }

    #[test]
    fn role_names_select_log_files() {
        assert_eq!(parse(&["--server"]).unwrap().into_role().unwrap().name(), "server");
        assert_eq!(
            parse(&["--client", "--serverHost", "h"])
                .unwrap()
                .into_role()
                .unwrap()
                .name(),
            "client"
        );
    }
}
