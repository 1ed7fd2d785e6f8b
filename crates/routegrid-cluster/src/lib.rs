//! routegrid-cluster: report intake and membership for routegrid.
//!
//! Provides the report wire format, the TCP transport in both
//! directions, interface address discovery, and the TTL-evicting
//! membership table the aggregator routes from.
//!
//! # Architecture
//!
//! ```text
//! Aggregator
//!   ├── ReportServer (TCP :8019)
//!   │   └── one report per connection → MembershipTable::upsert
//!   └── MembershipTable
//!       ├── identity → (report, receipt time)
//!       └── sweep(now) evicts entries older than the TTL
//!
//! Reporter
//!   └── Reporter
//!       ├── Resolves its interface address each cycle
//!       ├── Snapshots the latest health probe output
//!       └── Sends a fresh connection every interval
//! ```

pub mod agent;
pub mod iface;
pub mod membership;
pub mod report;
pub mod server;

pub use agent::{Reporter, ReporterConfig, SendError};
pub use iface::{InterfaceLookup, SystemInterfaces, wait_for_interface};
pub use membership::{MembershipEntry, MembershipTable};
pub use report::{NodeReport, ReportError};
pub use server::ReportServer;
