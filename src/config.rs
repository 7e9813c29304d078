//! Command-line configuration.

use crate::persistence::SnapshotConfig;
use crate::storage::ExpiryConfig;
use crate::{DEFAULT_HOST, DEFAULT_PORT};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "replaykv", version, about = "In-memory RESP key-value server with replay snapshots", long_about = None)]
pub struct Config {
    /// Address to listen on
    #[arg(long, default_value = DEFAULT_HOST)]
    pub bind: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Snapshot file; without one nothing is loaded or saved
    #[arg(value_name = "FILE")]
    pub snapshot: Option<PathBuf>,

    /// Snapshot file (same as the positional argument)
    #[arg(long = "file", value_name = "FILE", conflicts_with = "snapshot")]
    pub file: Option<PathBuf>,

    /// Seconds between periodic snapshots
    #[arg(long, default_value_t = 60)]
    pub save_interval: u64,

    /// Disable periodic snapshots (SAVE and the shutdown snapshot still run)
    #[arg(long)]
    pub no_save: bool,

    /// Milliseconds between expiry sweeps
    #[arg(long, default_value_t = 1000)]
    pub expire_interval: u64,
}

impl Config {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn snapshot_path(&self) -> Option<PathBuf> {
        self.snapshot.clone().or_else(|| self.file.clone())
    }

    pub fn snapshot_config(&self) -> SnapshotConfig {
        let interval = if self.no_save || self.save_interval == 0 {
            None
        } else {
            Some(Duration::from_secs(self.save_interval))
        };
        SnapshotConfig { interval }
    }

    pub fn expiry_config(&self) -> ExpiryConfig {
        ExpiryConfig {
            interval: Duration::from_millis(self.expire_interval.max(1)),
        }
    }
}
