//! Reporter: node-side cluster participation.
//!
//! The reporter runs on each node and pushes a [`NodeReport`] to the
//! aggregator on a fixed interval. Each send opens a fresh connection,
//! writes the payload, and closes; there is no reply. A failed send is
//! logged and retried on the next tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::iface::InterfaceLookup;
use crate::report::NodeReport;
use crate::server::DEFAULT_REPORT_PORT;

/// Default interval between reports.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(2);

/// Default connect timeout for a single send.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Configuration for the reporter.
#[derive(Debug, Clone)]
pub struct ReporterConfig {
    /// Aggregator host name or address.
    pub server_host: String,
    /// Aggregator report port.
    pub port: u16,
    /// Interface whose IPv4 address is advertised.
    pub interface: String,
    /// Interval between sends.
    pub interval: Duration,
    /// Connect (and write) timeout for one send.
    pub connect_timeout: Duration,
}

impl ReporterConfig {
    pub fn new(server_host: impl Into<String>, interface: impl Into<String>) -> Self {
        Self {
            server_host: server_host.into(),
            port: DEFAULT_REPORT_PORT,
            interface: interface.into(),
            interval: DEFAULT_REPORT_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Errors from a single send attempt.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("connect to {addr} timed out")]
    Timeout { addr: String },

    #[error("i/o error talking to {addr}: {source}")]
    Io {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Encode(#[from] crate::report::ReportError),
}

/// Periodically reports this node's health to the aggregator.
pub struct Reporter {
    config: ReporterConfig,
    /// Stable for the life of the process.
    identity: String,
    interfaces: Arc<dyn InterfaceLookup>,
    /// Latest health probe output, refreshed by the health collector.
    health: watch::Receiver<Vec<u8>>,
}

impl Reporter {
    pub fn new(
        config: ReporterConfig,
        identity: String,
        interfaces: Arc<dyn InterfaceLookup>,
        health: watch::Receiver<Vec<u8>>,
    ) -> Self {
        Self {
            config,
            identity,
            interfaces,
            health,
        }
    }

    /// Assemble the report for the current cycle.
    ///
    /// The health blob is a snapshot of whatever the collector last
    /// published; the interface address is resolved fresh each time.
    pub fn current_report(&self) -> NodeReport {
        let address = self.interfaces.ipv4_address(&self.config.interface);
        let health = self.health.borrow().clone();
        NodeReport::new(self.identity.clone(), address, health)
    }

    /// Send one report on a fresh connection.
    pub async fn send(&self, report: &NodeReport) -> Result<(), SendError> {
        let payload = report.encode()?;
        let addr = format!("{}:{}", self.config.server_host, self.config.port);

        let exchange = async {
            let mut stream = TcpStream::connect(&addr).await?;
            stream.write_all(&payload).await?;
            stream.shutdown().await
        };

        match tokio::time::timeout(self.config.connect_timeout, exchange).await {
            Ok(Ok(())) => {
                debug!(%addr, bytes = payload.len(), "report sent");
                Ok(())
            }
            Ok(Err(source)) => Err(SendError::Io { addr, source }),
            Err(_) => Err(SendError::Timeout { addr }),
        }
    }

    /// Run the report loop until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            identity = %self.identity,
            server = %self.config.server_host,
            port = self.config.port,
            interval = ?self.config.interval,
            "report loop started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.current_report();
                    if report.interface_address.is_none() {
                        debug!(interface = %self.config.interface, "interface has no IPv4 address yet");
                    }
                    if let Err(e) = self.send(&report).await {
                        warn!(error = %e, "report failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!(identity = %self.identity, "report loop shutting down");
                    break;
                }
            }
        }
    }
}
