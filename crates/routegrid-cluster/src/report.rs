//! Node reports and their wire encoding.
//!
//! A report is the unit of telemetry a reporter pushes to the aggregator:
//! one report per TCP connection, framed by the peer closing its write
//! half. The payload is a one-byte format version followed by the
//! bincode encoding of [`NodeReport`].

use std::net::Ipv4Addr;

use bincode::Options;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current wire format version.
pub const WIRE_VERSION: u8 = 1;

/// Largest payload the aggregator will accept for a single report.
pub const MAX_REPORT_BYTES: u64 = 1024 * 1024;

/// Errors produced while encoding or decoding a report.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("empty payload")]
    Empty,

    #[error("unsupported wire version {0}")]
    Version(u8),

    #[error("payload exceeds the report size limit")]
    TooLarge,

    #[error("malformed report: {0}")]
    Malformed(#[from] bincode::Error),
}

/// Health telemetry produced by one reporter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeReport {
    /// Random token generated once per reporter process.
    pub identity: String,
    /// The reporter's IPv4 address on its designated interface, if it is up.
    pub interface_address: Option<Ipv4Addr>,
    /// Raw standard output of the most recent health probe.
    pub health_check_output: Vec<u8>,
}

impl NodeReport {
    pub fn new(
        identity: impl Into<String>,
        interface_address: Option<Ipv4Addr>,
        health_check_output: Vec<u8>,
    ) -> Self {
        Self {
            identity: identity.into(),
            interface_address,
            health_check_output,
        }
    }

    /// Serialize into a wire payload.
    pub fn encode(&self) -> Result<Vec<u8>, ReportError> {
        let body = codec().serialize(self)?;
        let mut buf = Vec::with_capacity(body.len() + 1);
        buf.push(WIRE_VERSION);
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Deserialize exactly one report from a complete wire payload.
    ///
    /// Trailing bytes after the report are rejected, as is any payload
    /// larger than [`MAX_REPORT_BYTES`].
    pub fn decode(payload: &[u8]) -> Result<Self, ReportError> {
        if payload.len() as u64 > MAX_REPORT_BYTES {
            return Err(ReportError::TooLarge);
        }
        let (version, body) = payload.split_first().ok_or(ReportError::Empty)?;
        if *version != WIRE_VERSION {
            return Err(ReportError::Version(*version));
        }
        Ok(codec().deserialize(body)?)
    }
}

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_limit(MAX_REPORT_BYTES)
        .reject_trailing_bytes()
}

/// Generate a fresh reporter identity.
pub fn new_identity() -> String {
    uuid::Uuid::new_v4().to_string()
}
