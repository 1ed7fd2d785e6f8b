//! Route controller: derives the multipath default route from membership.
//!
//! Every node whose health output shows a live tunnel contributes one
//! equal-weight next hop. The controller remembers the last route it
//! applied and only touches the kernel when the derived route differs,
//! so a steady cluster produces no route churn.

use std::net::Ipv4Addr;
use std::sync::Arc;

use tracing::{debug, info, warn};

use routegrid_cluster::MembershipEntry;
use routegrid_health::HealthParser;

use crate::applier::{RouteApplier, RouteError};

/// Default egress device for next hops.
pub const DEFAULT_ROUTE_DEVICE: &str = "eth1";

/// Weight given to every next hop.
pub const NEXTHOP_WEIGHT: u32 = 1;

/// A route mutation issued by [`RouteController::recompute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteAction {
    /// Replace the default route with this multipath specification.
    Replace(String),
    /// Withdraw the default route.
    Delete,
}

/// One `nexthop` clause of a multipath route.
pub fn nexthop_clause(address: Ipv4Addr, device: &str) -> String {
    format!("nexthop via {address} dev {device} weight {NEXTHOP_WEIGHT}")
}

/// Diffs the desired route against the last applied one and applies changes.
pub struct RouteController {
    applier: Arc<dyn RouteApplier>,
    parser: HealthParser,
    device: String,
    /// Last route successfully applied, `None` if none is installed.
    current: Option<String>,
}

impl RouteController {
    pub fn new(applier: Arc<dyn RouteApplier>, device: impl Into<String>) -> Self {
        Self {
            applier,
            parser: HealthParser::default(),
            device: device.into(),
            current: None,
        }
    }

    /// Use a parser with a different tunnel marker.
    pub fn with_parser(mut self, parser: HealthParser) -> Self {
        self.parser = parser;
        self
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// The route the kernel should currently hold.
    pub fn current_route(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Build the route specification for `entries`, in iteration order.
    ///
    /// Empty when no entry has a live tunnel.
    pub fn desired_route(&self, entries: &[MembershipEntry]) -> String {
        let mut clauses = Vec::new();

        for entry in entries {
            let health = self.parser.parse(&entry.report.health_check_output);
            if !health.is_healthy() {
                continue;
            }
            match entry.report.interface_address {
                Some(address) => clauses.push(nexthop_clause(address, &self.device)),
                None => {
                    debug!(identity = %entry.identity(), "healthy node has no interface address yet");
                }
            }
        }

        clauses.join(" ")
    }

    /// The action needed to move from the current route to `candidate`.
    pub fn plan(&self, candidate: &str) -> Option<RouteAction> {
        match (candidate.is_empty(), self.current.as_deref()) {
            (true, Some(_)) => Some(RouteAction::Delete),
            (true, None) => None,
            (false, Some(current)) if current == candidate => None,
            (false, _) => Some(RouteAction::Replace(candidate.to_string())),
        }
    }

    /// Recompute the route from `entries` and apply it if it changed.
    ///
    /// Every replace or delete is followed by a route cache flush. If the
    /// mutation itself fails, the current route is left as it was so the
    /// next recompute retries.
    pub async fn recompute(
        &mut self,
        entries: &[MembershipEntry],
    ) -> Result<Option<RouteAction>, RouteError> {
        let candidate = self.desired_route(entries);

        let Some(action) = self.plan(&candidate) else {
            if candidate.is_empty() {
                debug!(members = entries.len(), "no viable routers");
            }
            return Ok(None);
        };

        match &action {
            RouteAction::Replace(spec) => {
                self.applier.replace(spec).await?;
                info!(route = %spec, "changing routes");
                self.current = Some(spec.clone());
            }
            RouteAction::Delete => {
                self.applier.delete().await?;
                info!(members = entries.len(), "no viable routers, default route withdrawn");
                self.current = None;
            }
        }

        if let Err(e) = self.applier.flush_cache().await {
            warn!(error = %e, "route cache flush failed");
        }

        Ok(Some(action))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Instant;

    use async_trait::async_trait;
    use routegrid_cluster::NodeReport;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Replace(String),
        Delete,
        Flush,
    }

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<Call>>,
        fail_replace: bool,
    }

    impl Recorder {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RouteApplier for Recorder {
        async fn replace(&self, spec: &str) -> Result<(), RouteError> {
            if self.fail_replace {
                return Err(RouteError::Spawn {
                    command: "ip route replace".to_string(),
                    source: std::io::Error::other("denied"),
                });
            }
            self.calls.lock().unwrap().push(Call::Replace(spec.to_string()));
            Ok(())
        }

        async fn delete(&self) -> Result<(), RouteError> {
            self.calls.lock().unwrap().push(Call::Delete);
            Ok(())
        }

        async fn flush_cache(&self) -> Result<(), RouteError> {
            self.calls.lock().unwrap().push(Call::Flush);
            Ok(())
        }
    }

    fn entry(identity: &str, address: Option<[u8; 4]>, health: &str) -> MembershipEntry {
        MembershipEntry {
            report: NodeReport::new(
                identity,
                address.map(Ipv4Addr::from),
                health.as_bytes().to_vec(),
            ),
            receipt_time: Instant::now(),
            peer: None,
        }
    }

    fn controller() -> (RouteController, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let controller = RouteController::new(recorder.clone(), "eth1");
        (controller, recorder)
    }

    const HEALTHY: &str = "sshuttle-count:1\n";
    const UNHEALTHY: &str = "sshuttle-count:0\n";

    #[test]
    fn clause_format() {
        assert_eq!(
            nexthop_clause(Ipv4Addr::new(10, 0, 0, 1), "eth1"),
            "nexthop via 10.0.0.1 dev eth1 weight 1"
        );
    }

    #[test]
    fn desired_route_includes_only_healthy_nodes() {
        let (controller, _) = controller();
        let entries = vec![
            entry("a", Some([10, 0, 0, 1]), HEALTHY),
            entry("b", Some([10, 0, 0, 2]), HEALTHY),
            entry("c", Some([10, 0, 0, 3]), UNHEALTHY),
            entry("d", Some([10, 0, 0, 4]), ""),
        ];

        let route = controller.desired_route(&entries);
        assert!(route.contains("nexthop via 10.0.0.1 dev eth1 weight 1"));
        assert!(route.contains("nexthop via 10.0.0.2 dev eth1 weight 1"));
        assert!(!route.contains("10.0.0.3"));
        assert!(!route.contains("10.0.0.4"));
        assert_eq!(
            route,
            "nexthop via 10.0.0.1 dev eth1 weight 1 nexthop via 10.0.0.2 dev eth1 weight 1"
        );
    }

    #[test]
    fn healthy_node_without_address_is_skipped() {
        let (controller, _) = controller();
        let entries = vec![entry("a", None, HEALTHY)];
        assert!(controller.desired_route(&entries).is_empty());
    }

    #[test]
    fn custom_marker_and_device() {
        let recorder = Arc::new(Recorder::default());
        let controller = RouteController::new(recorder, "bond0")
            .with_parser(HealthParser::new("wg"));
        let entries = vec![entry("a", Some([10, 0, 0, 1]), "wg-peers:2\n")];

        assert_eq!(controller.device(), "bond0");
        assert_eq!(
            controller.desired_route(&entries),
            "nexthop via 10.0.0.1 dev bond0 weight 1"
        );
    }

    #[test]
    fn plan_transitions() {
        let (mut controller, _) = controller();
        assert_eq!(controller.plan(""), None);
        assert_eq!(
            controller.plan("nexthop via 10.0.0.1 dev eth1 weight 1"),
            Some(RouteAction::Replace("nexthop via 10.0.0.1 dev eth1 weight 1".to_string()))
        );

        controller.current = Some("nexthop via 10.0.0.1 dev eth1 weight 1".to_string());
        assert_eq!(controller.plan("nexthop via 10.0.0.1 dev eth1 weight 1"), None);
        assert_eq!(controller.plan(""), Some(RouteAction::Delete));
    }

    #[tokio::test]
    async fn first_healthy_node_installs_route() {
        let (mut controller, recorder) = controller();
        let entries = vec![entry("a", Some([10, 0, 0, 1]), HEALTHY)];

        let action = controller.recompute(&entries).await.unwrap();

        let spec = "nexthop via 10.0.0.1 dev eth1 weight 1".to_string();
        assert_eq!(action, Some(RouteAction::Replace(spec.clone())));
        assert_eq!(controller.current_route(), Some(spec.as_str()));
        assert_eq!(recorder.calls(), vec![Call::Replace(spec), Call::Flush]);
    }

    #[tokio::test]
    async fn unchanged_membership_is_idempotent() {
        let (mut controller, recorder) = controller();
        let entries = vec![
            entry("a", Some([10, 0, 0, 1]), HEALTHY),
            entry("b", Some([10, 0, 0, 2]), HEALTHY),
        ];

        assert!(controller.recompute(&entries).await.unwrap().is_some());
        assert!(controller.recompute(&entries).await.unwrap().is_none());
        assert!(controller.recompute(&entries).await.unwrap().is_none());

        let replaces = recorder
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Replace(_)))
            .count();
        assert_eq!(replaces, 1);
    }

    #[tokio::test]
    async fn losing_all_healthy_nodes_withdraws_once() {
        let (mut controller, recorder) = controller();
        let healthy = vec![entry("a", Some([10, 0, 0, 1]), HEALTHY)];
        let unhealthy = vec![entry("a", Some([10, 0, 0, 1]), UNHEALTHY)];

        controller.recompute(&healthy).await.unwrap();
        assert_eq!(
            controller.recompute(&unhealthy).await.unwrap(),
            Some(RouteAction::Delete)
        );
        assert_eq!(controller.current_route(), None);
        assert_eq!(controller.recompute(&unhealthy).await.unwrap(), None);
        assert_eq!(controller.recompute(&[]).await.unwrap(), None);

        let calls = recorder.calls();
        assert_eq!(calls.iter().filter(|c| **c == Call::Delete).count(), 1);
        assert_eq!(calls.last(), Some(&Call::Flush));
    }

    #[tokio::test]
    async fn empty_membership_without_route_does_nothing() {
        let (mut controller, recorder) = controller();
        assert_eq!(controller.recompute(&[]).await.unwrap(), None);
        assert!(recorder.calls().is_empty());
    }

    #[tokio::test]
    async fn membership_change_replaces_route() {
        let (mut controller, recorder) = controller();
        let one = vec![entry("a", Some([10, 0, 0, 1]), HEALTHY)];
        let two = vec![
            entry("a", Some([10, 0, 0, 1]), HEALTHY),
            entry("b", Some([10, 0, 0, 2]), HEALTHY),
        ];

        controller.recompute(&one).await.unwrap();
        let action = controller.recompute(&two).await.unwrap();

        assert!(matches!(action, Some(RouteAction::Replace(ref s)) if s.contains("10.0.0.2")));
        assert_eq!(recorder.calls().len(), 4);
    }

    #[tokio::test]
    async fn failed_replace_keeps_baseline_and_retries() {
        let recorder = Arc::new(Recorder {
            fail_replace: true,
            ..Default::default()
        });
        let mut controller = RouteController::new(recorder.clone(), "eth1");
        let entries = vec![entry("a", Some([10, 0, 0, 1]), HEALTHY)];

        assert!(controller.recompute(&entries).await.is_err());
        assert_eq!(controller.current_route(), None);
        // No flush after a failed mutation.
        assert!(recorder.calls().is_empty());
        // Still pending on the next pass.
        assert!(controller.recompute(&entries).await.is_err());
    }
}
