//! Report listener: aggregator side of the transport.
//!
//! Accepts one report per connection. Each connection is read until the
//! peer closes, the accumulated bytes are decoded into a single
//! [`NodeReport`], stamped with the aggregator's receipt time, and
//! upserted into the [`MembershipTable`]. The aggregator never replies.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::membership::MembershipTable;
use crate::report::{MAX_REPORT_BYTES, NodeReport, ReportError};

/// Default TCP port for report intake.
pub const DEFAULT_REPORT_PORT: u16 = 8019;

/// How long a single connection may take to deliver its report.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Listens for node reports and feeds the membership table.
pub struct ReportServer {
    listener: TcpListener,
    membership: MembershipTable,
    read_timeout: Duration,
    /// Peer addresses already announced in the log.
    announced_peers: Arc<Mutex<HashSet<IpAddr>>>,
}

impl ReportServer {
    /// Bind the listening socket.
    pub async fn bind(addr: SocketAddr, membership: MembershipTable) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "report listener bound");
        Ok(Self {
            listener,
            membership,
            read_timeout: DEFAULT_READ_TIMEOUT,
            announced_peers: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// Set the per-connection read deadline.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until shutdown is signalled.
    ///
    /// Each connection is handled on its own task; a failure in one
    /// connection never affects the listener or other entries.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("accepting reports");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let membership = self.membership.clone();
                            let announced = Arc::clone(&self.announced_peers);
                            let read_timeout = self.read_timeout;
                            tokio::spawn(async move {
                                handle_connection(stream, peer, membership, announced, read_timeout).await;
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("report listener shutting down");
                    break;
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    membership: MembershipTable,
    announced: Arc<Mutex<HashSet<IpAddr>>>,
    read_timeout: Duration,
) {
    let payload = match tokio::time::timeout(read_timeout, read_payload(stream)).await {
        Ok(Ok(payload)) => payload,
        Ok(Err(e)) => {
            warn!(%peer, error = %e, "discarding report");
            return;
        }
        Err(_) => {
            warn!(%peer, timeout = ?read_timeout, "discarding report: read timed out");
            return;
        }
    };

    let report = match NodeReport::decode(&payload) {
        Ok(report) => report,
        Err(e) => {
            warn!(%peer, bytes = payload.len(), error = %e, "discarding report");
            return;
        }
    };
    let receipt_time = Instant::now();

    let peer_ip = peer.ip();
    if should_announce(peer_ip, &membership, &announced) {
        info!(peer = %peer_ip, identity = %report.identity, "report from new peer address");
    }

    debug!(
        %peer,
        identity = %report.identity,
        address = ?report.interface_address,
        "report received"
    );
    membership.upsert(report, receipt_time, Some(peer_ip));
}

/// Whether a report from `peer` should be logged as coming from a new address.
///
/// True at most once per address. Loopback peers and addresses already tied
/// to a member are never announced.
fn should_announce(
    peer: IpAddr,
    membership: &MembershipTable,
    announced: &Mutex<HashSet<IpAddr>>,
) -> bool {
    if peer.is_loopback() || membership.knows_peer(peer) {
        return false;
    }
    announced.lock().expect("peer set lock").insert(peer)
}

/// Read until EOF, rejecting anything over the size limit.
async fn read_payload(stream: TcpStream) -> Result<Vec<u8>, ReadError> {
    let mut buf = Vec::new();
    stream
        .take(MAX_REPORT_BYTES + 1)
        .read_to_end(&mut buf)
        .await?;
    if buf.len() as u64 > MAX_REPORT_BYTES {
        return Err(ReadError::Report(ReportError::TooLarge));
    }
    Ok(buf)
}

#[derive(Debug, thiserror::Error)]
enum ReadError {
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Report(#[from] ReportError),
}
