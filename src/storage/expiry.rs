//! Background expiry sweeper
//!
//! Expired entries are already invisible to reads, but an entry that is never
//! touched again would stay in its tablet forever. The sweeper periodically
//! removes them from every table of a [`LocalCluster`].
//!
//! The interval adapts: it halves while a large share of the stored entries
//! keeps expiring and doubles while nothing expires, within configured bounds.

use crate::storage::LocalCluster;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, trace};

#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    pub base_interval: Duration,
    pub min_interval: Duration,
    pub max_interval: Duration,
    /// Expired share of entries above which sweeping speeds up.
    pub speedup_threshold: f64,
    /// Expired share of entries below which sweeping slows down.
    pub slowdown_threshold: f64,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(100),
            min_interval: Duration::from_millis(10),
            max_interval: Duration::from_secs(1),
            speedup_threshold: 0.25,
            slowdown_threshold: 0.01,
        }
    }
}

/// Handle to a running sweeper. Dropping it stops the task.
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown_tx: watch::Sender<bool>,
}

impl ExpirySweeper {
    /// Spawns the sweeper on the current tokio runtime.
    pub fn start(cluster: LocalCluster, config: ExpiryConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(sweep_loop(cluster, config, shutdown_rx));
        info!("Expiry sweeper started");
        Self { shutdown_tx }
    }

    pub fn stop(&self) {
        if !*self.shutdown_tx.borrow() {
            let _ = self.shutdown_tx.send(true);
            info!("Expiry sweeper stopped");
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweep_loop(
    cluster: LocalCluster,
    config: ExpiryConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = config.base_interval;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper shutting down");
                    return;
                }
            }
        }

        let before = cluster.len();
        let expired = cluster.cleanup_expired();
        interval = next_interval(interval, before, expired, &config);

        if expired > 0 {
            debug!(
                expired,
                remaining = cluster.len(),
                next_ms = interval.as_millis() as u64,
                "Removed expired entries"
            );
        } else {
            trace!(next_ms = interval.as_millis() as u64, "Nothing expired");
        }
    }
}

fn next_interval(current: Duration, before: u64, expired: u64, config: &ExpiryConfig) -> Duration {
    if before == 0 {
        return current;
    }
    let rate = expired as f64 / before as f64;
    if rate > config.speedup_threshold {
        (current / 2).max(config.min_interval)
    } else if expired == 0 && rate < config.slowdown_threshold {
        (current * 2).min(config.max_interval)
    } else {
        current
    }
}
