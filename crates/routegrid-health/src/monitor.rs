//! Health collector: background task that refreshes the probe output.
//!
//! The collector runs the probe on its own interval and publishes each
//! successful output on a `watch` channel. The report loop reads the
//! latest value at send time. A failed run keeps the previous output.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::checker::{ProbeError, run_probe};

/// Default interval between probe runs.
pub const DEFAULT_COLLECT_INTERVAL: Duration = Duration::from_secs(5);

/// Default limit on a single probe run.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(4);

/// Periodically runs the health probe and publishes its output.
pub struct HealthCollector {
    probe: PathBuf,
    interval: Duration,
    timeout: Duration,
    output: watch::Sender<Vec<u8>>,
}

impl HealthCollector {
    /// Create a collector for `probe`, returning it with a receiver
    /// for the published output (initially empty).
    pub fn new(probe: impl Into<PathBuf>) -> (Self, watch::Receiver<Vec<u8>>) {
        let (output, rx) = watch::channel(Vec::new());
        let collector = Self {
            probe: probe.into(),
            interval: DEFAULT_COLLECT_INTERVAL,
            timeout: DEFAULT_PROBE_TIMEOUT,
            output,
        };
        (collector, rx)
    }

    /// Set the collection interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run the probe once, publishing the output on success.
    pub async fn collect(&self) -> Result<(), ProbeError> {
        let output = run_probe(&self.probe, self.timeout).await?;
        self.output.send_replace(output);
        Ok(())
    }

    /// Collect on every tick until shutdown. The first run is immediate.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            probe = %self.probe.display(),
            interval_secs = self.interval.as_secs(),
            "health collector started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.collect().await {
                        warn!(error = %e, "health probe failed, keeping previous output");
                    }
                }
                _ = shutdown.changed() => {
                    info!("health collector shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let (collector, rx) = HealthCollector::new("./health_check.sh");
        assert_eq!(collector.interval, Duration::from_secs(5));
        assert!(rx.borrow().is_empty());
    }

    #[tokio::test]
    async fn failed_probe_keeps_previous_output() {
        let (collector, rx) = HealthCollector::new("/nonexistent/health_check.sh");
        collector.output.send_replace(b"sshuttle-count:1\n".to_vec());

        assert!(collector.collect().await.is_err());
        assert_eq!(*rx.borrow(), b"sshuttle-count:1\n".to_vec());
    }

    #[tokio::test]
    async fn loop_survives_probe_failures() {
        let (collector, _rx) = HealthCollector::new("/nonexistent/health_check.sh");
        let collector = collector.with_interval(Duration::from_millis(10));
        let (tx, shutdown) = watch::channel(false);

        let handle = tokio::spawn(async move { collector.run(shutdown).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_probe_is_published() {
        let (collector, rx) = HealthCollector::new("true");
        collector.output.send_replace(b"stale".to_vec());

        collector.collect().await.unwrap();
        assert!(rx.borrow().is_empty());
    }
}
