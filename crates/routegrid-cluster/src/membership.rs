//! Membership table: tracks the last report received from each node.
//!
//! Entries are keyed by reporter identity and expire when no report has
//! been received for longer than the TTL. Staleness is measured from the
//! aggregator's own receipt time, never from anything the reporter
//! claims, so a reporter cannot extend its own lease.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::report::NodeReport;

/// Default age after which an entry is evicted.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5);

/// Aggregator-side view of one reporting node.
#[derive(Debug, Clone)]
pub struct MembershipEntry {
    /// The last report received for this identity.
    pub report: NodeReport,
    /// When the report was fully decoded, by the aggregator's clock.
    pub receipt_time: Instant,
    /// Network address the report arrived from.
    pub peer: Option<IpAddr>,
}

impl MembershipEntry {
    pub fn identity(&self) -> &str {
        &self.report.identity
    }

    /// Whether the entry is older than `ttl` at `now`.
    pub fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.receipt_time) > ttl
    }
}

/// Thread-safe identity → entry map with TTL eviction.
///
/// Cloning is cheap and every clone shares the same table. Each entry is
/// replaced or removed as a whole under the write lock, so readers never
/// observe a report paired with another report's receipt time.
#[derive(Debug, Clone)]
pub struct MembershipTable {
    entries: Arc<RwLock<HashMap<String, MembershipEntry>>>,
    ttl: Duration,
}

impl Default for MembershipTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MembershipTable {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl: DEFAULT_TTL,
        }
    }

    /// Set the eviction TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Insert or wholesale replace the entry for the report's identity.
    ///
    /// Returns `true` if the identity was not previously known.
    pub fn upsert(&self, report: NodeReport, receipt_time: Instant, peer: Option<IpAddr>) -> bool {
        let identity = report.identity.clone();
        let entry = MembershipEntry {
            report,
            receipt_time,
            peer,
        };

        let mut entries = self.entries.write().expect("membership lock");
        let is_new = entries.insert(identity.clone(), entry).is_none();
        drop(entries);

        if is_new {
            info!(%identity, ?peer, "node joined membership");
        } else {
            debug!(%identity, "report refreshed");
        }
        is_new
    }

    /// Remove every entry older than the TTL at `now`.
    ///
    /// Returns the identities that were removed.
    pub fn sweep(&self, now: Instant) -> Vec<String> {
        let mut entries = self.entries.write().expect("membership lock");
        let mut removed = Vec::new();
        entries.retain(|identity, entry| {
            if entry.is_expired(now, self.ttl) {
                removed.push(identity.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Consistent copy of all current entries, ordered by identity.
    ///
    /// The order only depends on which identities are present, so the same
    /// live set always yields the same sequence.
    pub fn snapshot(&self) -> Vec<MembershipEntry> {
        let entries = self.entries.read().expect("membership lock");
        let mut snapshot: Vec<MembershipEntry> = entries.values().cloned().collect();
        snapshot.sort_by(|a, b| a.identity().cmp(b.identity()));
        snapshot
    }

    /// Look up a single entry.
    pub fn get(&self, identity: &str) -> Option<MembershipEntry> {
        let entries = self.entries.read().expect("membership lock");
        entries.get(identity).cloned()
    }

    /// Whether any current entry last reported from `peer`.
    pub fn knows_peer(&self, peer: IpAddr) -> bool {
        let entries = self.entries.read().expect("membership lock");
        entries.values().any(|e| e.peer == Some(peer))
    }

    /// Identities currently in the table.
    pub fn identities(&self) -> Vec<String> {
        let entries = self.entries.read().expect("membership lock");
        entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("membership lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
