//! Health probe execution and tunnel health parsing.
//!
//! The probe is an external executable whose standard output is carried
//! verbatim in every report. The aggregator scans that output for the
//! tunnel marker to decide whether a node can carry traffic.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, trace};

/// Marker identifying the tunnel count line in probe output.
pub const DEFAULT_TUNNEL_MARKER: &str = "sshuttle";

/// Tunnel liveness extracted from one probe output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TunnelHealth {
    /// Highest count among parseable marker lines, `None` if there were none.
    pub count: Option<i64>,
}

impl TunnelHealth {
    /// Whether the node has at least one live outbound tunnel.
    pub fn is_healthy(&self) -> bool {
        self.count.is_some_and(|c| c > 0)
    }
}

/// Extracts the tunnel signal from probe output.
///
/// Matching lines have the form `<label>:<count>`. Every line containing
/// the marker is considered; a line whose count is missing or not an
/// integer is skipped without affecting the others.
#[derive(Debug, Clone)]
pub struct HealthParser {
    marker: String,
}

impl Default for HealthParser {
    fn default() -> Self {
        Self::new(DEFAULT_TUNNEL_MARKER)
    }
}

impl HealthParser {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    pub fn parse(&self, output: &[u8]) -> TunnelHealth {
        let text = String::from_utf8_lossy(output);
        let mut health = TunnelHealth::default();

        for line in text.lines().filter(|l| l.contains(self.marker.as_str())) {
            let Some(field) = line.split(':').nth(1) else {
                trace!(line = %line, "marker line without count");
                continue;
            };
            match field.trim().parse::<i64>() {
                Ok(count) => {
                    health.count = Some(health.count.map_or(count, |c| c.max(count)));
                }
                Err(_) => trace!(line = %line, "unparseable tunnel count"),
            }
        }

        health
    }

    pub fn is_healthy(&self, output: &[u8]) -> bool {
        self.parse(output).is_healthy()
    }
}

/// Errors from running the health probe.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to run {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} exited with {status}: {stderr}")]
    Exit {
        path: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("{path} did not finish within {timeout:?}")]
    Timeout { path: String, timeout: Duration },
}

/// Run the probe executable with no arguments and capture its stdout.
pub async fn run_probe(path: &Path, timeout: Duration) -> Result<Vec<u8>, ProbeError> {
    let path_str = path.display().to_string();

    let child = Command::new(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ProbeError::Spawn {
            path: path_str.clone(),
            source,
        })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|source| ProbeError::Spawn {
            path: path_str.clone(),
            source,
        })?,
        Err(_) => {
            return Err(ProbeError::Timeout {
                path: path_str,
                timeout,
            });
        }
    };

    if !output.status.success() {
        return Err(ProbeError::Exit {
            path: path_str,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    debug!(path = %path_str, bytes = output.stdout.len(), "health probe completed");
    Ok(output.stdout)
}
