//! Persistence Module
//!
//! Snapshots are written and read with the same decoder and dispatcher that
//! serve clients. See [`snapshot`] for the file format.
//!
//! ```text
//!   save:  "DUMPALL","QUIT" ──> Pipeline ──replies──> <path>.tmp ──rename──> <path>
//!   load:  <path> ──chunks──> Pipeline (replies dropped) ──> keyspace
//! ```

pub mod snapshot;

pub use snapshot::{SnapshotConfig, SnapshotScheduler, Snapshotter};

use tokio::sync::mpsc;

/// Creates the `SAVE` request channel.
///
/// The channel holds at most one pending request, so any number of `SAVE`
/// commands issued before the snapshot task wakes up result in one save.
pub fn save_channel() -> (SaveTrigger, SaveRequests) {
    let (tx, rx) = mpsc::channel(1);
    (SaveTrigger { tx }, SaveRequests { rx })
}

/// Sending half, cloned into every connection.
#[derive(Debug, Clone)]
pub struct SaveTrigger {
    tx: mpsc::Sender<()>,
}

impl SaveTrigger {
    pub fn request(&self) {
        // Full means a save is already pending.
        let _ = self.tx.try_send(());
    }
}

/// Receiving half, owned by the snapshot task.
#[derive(Debug)]
pub struct SaveRequests {
    rx: mpsc::Receiver<()>,
}

impl SaveRequests {
    /// Completes when a request arrives. Never completes once every trigger
    /// has been dropped.
    pub async fn next(&mut self) {
        if self.rx.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}
