//! Background Expiry Reaper
//!
//! Reads never look at expiry, so this periodic sweep is the only thing that
//! removes expired keys. Between an entry's expiry and the next sweep a
//! client can still read it.
//!
//! The reaper is a local task on the server's single-threaded runtime. Each
//! sweep borrows the keyspace once and runs to completion, so it never
//! interleaves with a command.

use crate::storage::keyspace::{now_millis, SharedKeyspace};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Configuration for the expiry reaper.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Time between sweeps (default: 1s)
    pub interval: Duration,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
        }
    }
}

/// Runs one sweep at `now`, logging each removed key. Returns the count.
pub fn reap_expired(keyspace: &SharedKeyspace, now: u64) -> usize {
    let removed = keyspace.borrow_mut().remove_expired(now);
    for key in &removed {
        info!(key = %String::from_utf8_lossy(key), "Expired key removed");
    }
    removed.len()
}

/// Handle to the running reaper. Dropping it stops the task.
#[derive(Debug)]
pub struct ExpiryReaper {
    shutdown_tx: watch::Sender<bool>,
}

impl ExpiryReaper {
    /// Spawns the reaper on the current `LocalSet`.
    pub fn start(keyspace: SharedKeyspace, config: ExpiryConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::task::spawn_local(reaper_loop(keyspace, config, shutdown_rx));

        Self { shutdown_tx }
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for ExpiryReaper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn reaper_loop(
    keyspace: SharedKeyspace,
    config: ExpiryConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(interval_ms = config.interval.as_millis() as u64, "Expiry reaper started");

    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry reaper received shutdown signal");
                    return;
                }
            }
        }

        let removed = reap_expired(&keyspace, now_millis());
        if removed > 0 {
            debug!(
                removed = removed,
                keys_remaining = keyspace.borrow().len(),
                "Expiry sweep finished"
            );
        }
    }
}
