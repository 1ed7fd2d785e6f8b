//! routegrid-health: tunnel health for routegrid.
//!
//! Reporters run an external probe executable on a fixed interval and
//! ship its raw output; the aggregator parses that output for the tunnel
//! marker line to decide which nodes may carry traffic.
//!
//! # Architecture
//!
//! ```text
//! Reporter
//!   └── HealthCollector (every 5s)
//!       ├── run_probe() → stdout bytes
//!       └── publish on watch channel (stale output kept on failure)
//!
//! Aggregator
//!   └── HealthParser
//!       └── "<label>:<count>" marker lines → TunnelHealth
//! ```

pub mod checker;
pub mod monitor;

pub use checker::{HealthParser, ProbeError, TunnelHealth, run_probe};
pub use monitor::HealthCollector;
