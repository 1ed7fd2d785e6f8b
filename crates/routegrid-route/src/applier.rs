//! Kernel route programming.
//!
//! The controller only ever needs three mutations: replace the default
//! route in the routing table, delete it, and flush the route cache.
//! [`IpRouteApplier`] runs them through `ip route`; [`DryRunApplier`]
//! logs them instead, for hosts without the privilege (or the `ip`
//! tool) to change routes.

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

/// Default routing table holding the multipath default route.
pub const DEFAULT_ROUTE_TABLE: &str = "workspaces";

/// Errors from a route mutation.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: ExitStatus,
        stderr: String,
    },
}

/// One route mutation, as `ip` arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteCommand {
    Replace { table: String, spec: String },
    Delete { table: String },
    FlushCache,
}

impl RouteCommand {
    /// Arguments passed to `ip`.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec!["route".to_string()];
        match self {
            RouteCommand::Replace { table, spec } => {
                args.extend(["replace", "table", table.as_str(), "default"].map(String::from));
                args.extend(spec.split_whitespace().map(String::from));
            }
            RouteCommand::Delete { table } => {
                args.extend(["del", "table", table.as_str(), "default"].map(String::from));
            }
            RouteCommand::FlushCache => {
                args.extend(["flush", "cache"].map(String::from));
            }
        }
        args
    }
}

impl std::fmt::Display for RouteCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ip {}", self.args().join(" "))
    }
}

/// Applies route mutations to the system.
#[async_trait]
pub trait RouteApplier: Send + Sync {
    /// Replace the default route with a multipath `spec`.
    async fn replace(&self, spec: &str) -> Result<(), RouteError>;

    /// Delete the default route.
    async fn delete(&self) -> Result<(), RouteError>;

    /// Flush the routing cache.
    async fn flush_cache(&self) -> Result<(), RouteError>;
}

/// Runs mutations with the `ip` tool.
#[derive(Debug, Clone)]
pub struct IpRouteApplier {
    table: String,
}

impl IpRouteApplier {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    async fn exec(&self, command: RouteCommand) -> Result<(), RouteError> {
        let cmd_line = command.to_string();
        debug!(command = %cmd_line, "running route command");

        let output = Command::new("ip")
            .args(command.args())
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| RouteError::Spawn {
                command: cmd_line.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(RouteError::Failed {
                command: cmd_line,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RouteApplier for IpRouteApplier {
    async fn replace(&self, spec: &str) -> Result<(), RouteError> {
        self.exec(RouteCommand::Replace {
            table: self.table.clone(),
            spec: spec.to_string(),
        })
        .await
    }

    async fn delete(&self) -> Result<(), RouteError> {
        self.exec(RouteCommand::Delete {
            table: self.table.clone(),
        })
        .await
    }

    async fn flush_cache(&self) -> Result<(), RouteError> {
        self.exec(RouteCommand::FlushCache).await
    }
}

/// Logs mutations without touching the system.
#[derive(Debug, Clone)]
pub struct DryRunApplier {
    table: String,
}

impl DryRunApplier {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }
}

#[async_trait]
impl RouteApplier for DryRunApplier {
    async fn replace(&self, spec: &str) -> Result<(), RouteError> {
        let command = RouteCommand::Replace {
            table: self.table.clone(),
            spec: spec.to_string(),
        };
        info!(%command, "dry run: skipping route command");
        Ok(())
    }

    async fn delete(&self) -> Result<(), RouteError> {
        let command = RouteCommand::Delete {
            table: self.table.clone(),
        };
        info!(%command, "dry run: skipping route command");
        Ok(())
    }

    async fn flush_cache(&self) -> Result<(), RouteError> {
        info!(command = %RouteCommand::FlushCache, "dry run: skipping route command");
        Ok(())
    }
}

/// The applier for this platform: `ip route` on Linux unless `dry_run`
/// is set, logging only everywhere else.
pub fn platform_applier(table: &str, dry_run: bool) -> Arc<dyn RouteApplier> {
    if cfg!(target_os = "linux") && !dry_run {
        Arc::new(IpRouteApplier::new(table))
    } else {
        Arc::new(DryRunApplier::new(table))
    }
}
