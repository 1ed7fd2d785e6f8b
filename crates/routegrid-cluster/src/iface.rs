//! Interface address discovery.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Default polling interval while waiting for an interface.
pub const INTERFACE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Resolves the IPv4 address bound to a named network interface.
pub trait InterfaceLookup: Send + Sync {
    /// Returns `None` if the interface does not exist or has no IPv4 address yet.
    fn ipv4_address(&self, name: &str) -> Option<Ipv4Addr>;
}

/// Looks addresses up from the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemInterfaces;

impl InterfaceLookup for SystemInterfaces {
    fn ipv4_address(&self, name: &str) -> Option<Ipv4Addr> {
        let interfaces = match local_ip_address::list_afinet_netifas() {
            Ok(ifs) => ifs,
            Err(e) => {
                debug!(error = %e, "failed to list network interfaces");
                return None;
            }
        };

        interfaces.into_iter().find_map(|(ifname, ip)| match ip {
            IpAddr::V4(v4) if ifname == name => Some(v4),
            _ => None,
        })
    }
}

/// Block until `name` has an IPv4 address, polling every `poll`.
///
/// Returns `None` if shutdown is signalled first.
pub async fn wait_for_interface(
    lookup: &dyn InterfaceLookup,
    name: &str,
    poll: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Option<Ipv4Addr> {
    let mut warned = false;
    loop {
        if let Some(addr) = lookup.ipv4_address(name) {
            info!(interface = %name, %addr, "interface is up");
            return Some(addr);
        }
        if !warned {
            warn!(interface = %name, "interface not configured yet, waiting");
            warned = true;
        }

        tokio::select! {
            _ = tokio::time::sleep(poll) => {}
            _ = shutdown.changed() => return None,
        }
    }
}
