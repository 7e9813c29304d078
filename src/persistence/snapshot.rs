//! Replay snapshots.
//!
//! A snapshot is the byte stream a client would receive after sending
//! `DUMPALL` and `QUIT`: a `FLUSHDB` command followed by one `SET` per live
//! key. Writing one runs those two commands through a private [`Pipeline`]
//! and keeps the encoded replies. Loading one feeds the file back through a
//! second pipeline with no sink, so every frame executes as a command.

use crate::commands::CommandHandler;
use crate::connection::Pipeline;
use crate::persistence::SaveRequests;
use crate::protocol::RespValue;
use crate::storage::SharedKeyspace;
use anyhow::{bail, Context};
use bytes::BytesMut;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Chunk size used when replaying a snapshot file.
const LOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Reads and writes the snapshot file for one keyspace.
#[derive(Debug)]
pub struct Snapshotter {
    keyspace: SharedKeyspace,
    path: Option<PathBuf>,
}

impl Snapshotter {
    /// With `path == None`, loading and saving are no-ops.
    pub fn new(keyspace: SharedKeyspace, path: Option<PathBuf>) -> Self {
        Self { keyspace, path }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Replays the snapshot into the keyspace, returning the number of
    /// commands executed.
    ///
    /// Any failure is logged and leaves the keyspace empty. The keyspace is
    /// clean afterwards either way.
    pub async fn load(&self) -> usize {
        let Some(path) = &self.path else {
            return 0;
        };

        let replayed = match self.replay(path).await {
            Ok(commands) => {
                info!(
                    path = %path.display(),
                    commands,
                    keys = self.keyspace.borrow().len(),
                    "Snapshot loaded"
                );
                commands
            }
            Err(e) if is_not_found(&e) => {
                info!(path = %path.display(), "No snapshot found, starting empty");
                0
            }
            Err(e) => {
                warn!(path = %path.display(), error = %format!("{:#}", e), "Snapshot not loaded, starting empty");
                self.keyspace.borrow_mut().clear();
                0
            }
        };

        self.keyspace.borrow_mut().take_dirty();
        replayed
    }

    async fn replay(&self, path: &Path) -> anyhow::Result<usize> {
        let mut file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("opening {}", path.display()))?;

        let mut pipeline = Pipeline::new(CommandHandler::new(self.keyspace.clone(), "loader"));
        let mut chunk = BytesMut::with_capacity(LOAD_CHUNK_SIZE);

        loop {
            chunk.clear();
            let n = file
                .read_buf(&mut chunk)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            if n == 0 {
                break;
            }
            let flow = pipeline
                .process(&chunk, None)
                .with_context(|| format!("decoding {}", path.display()))?;
            if flow.is_break() {
                break;
            }
        }

        if !pipeline.is_idle() {
            bail!("{} ends inside a frame", path.display());
        }
        Ok(pipeline.commands() as usize)
    }

    /// Encodes the current keyspace as a replayable command stream.
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let mut script = Vec::new();
        RespValue::command(["DUMPALL"]).serialize_into(&mut script);
        RespValue::command(["QUIT"]).serialize_into(&mut script);

        let mut pipeline = Pipeline::new(CommandHandler::new(self.keyspace.clone(), "snapshot"));
        let mut out = Vec::new();
        pipeline
            .process(&script, Some(&mut out))
            .context("running DUMPALL")?;
        Ok(out)
    }

    /// Writes a snapshot if the keyspace changed since the last one.
    ///
    /// Returns `Ok(false)` when there was nothing to do. On failure the
    /// dirty flag is restored so the next attempt writes again.
    pub async fn save(&self) -> anyhow::Result<bool> {
        let Some(path) = &self.path else {
            return Ok(false);
        };
        if !self.keyspace.borrow_mut().take_dirty() {
            return Ok(false);
        }

        let result = match self.encode() {
            Ok(bytes) => write_atomic(path, &bytes).await.map(|()| bytes.len()),
            Err(e) => Err(e),
        };

        match result {
            Ok(size) => {
                info!(path = %path.display(), bytes = size, "Snapshot written");
                Ok(true)
            }
            Err(e) => {
                self.keyspace.borrow_mut().mark_dirty();
                Err(e)
            }
        }
    }
}

fn is_not_found(e: &anyhow::Error) -> bool {
    e.downcast_ref::<std::io::Error>()
        .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound)
}

/// `<path>.tmp`
fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Writes `<path>.tmp` and renames it over `path`.
async fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    let tmp = tmp_path(path);
    tokio::fs::write(&tmp, bytes)
        .await
        .with_context(|| format!("writing {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("renaming {} to {}", tmp.display(), path.display()))?;
    Ok(())
}

/// Configuration for the snapshot task.
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    /// Time between periodic saves; `None` saves only on request.
    pub interval: Option<Duration>,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            interval: Some(Duration::from_secs(60)),
        }
    }
}

/// Handle to the task that performs every save.
///
/// Periodic saves, `SAVE` requests and the final save at shutdown all run
/// on this one task, so two writes never overlap. Requests that arrive
/// while a save is running collapse into one follow-up save.
#[derive(Debug)]
pub struct SnapshotScheduler {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SnapshotScheduler {
    /// Spawns the task on the current `LocalSet`.
    pub fn start(snapshotter: Rc<Snapshotter>, config: SnapshotConfig, requests: SaveRequests) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::task::spawn_local(snapshot_loop(snapshotter, config, requests, shutdown_rx));
        Self { shutdown_tx, handle }
    }

    /// Performs a final save and waits for the task to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            error!(error = %e, "Snapshot task failed");
        }
    }
}

async fn snapshot_loop(
    snapshotter: Rc<Snapshotter>,
    config: SnapshotConfig,
    mut requests: SaveRequests,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(
        path = ?snapshotter.path(),
        interval_secs = config.interval.map(|d| d.as_secs()),
        "Snapshot task started"
    );

    let mut ticker = config.interval.map(|period| {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.reset();
        ticker
    });

    loop {
        let last = tokio::select! {
            _ = next_tick(&mut ticker) => false,
            _ = requests.next() => false,
            _ = shutdown_rx.changed() => true,
        };

        if last {
            debug!("Snapshot task received shutdown signal");
        }
        if let Err(e) = snapshotter.save().await {
            error!(error = %format!("{:#}", e), "Snapshot failed");
        }
        if last {
            return;
        }
    }
}

/// Waits for the next tick, or forever without periodic saves.
async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{now_millis, Entry, Keyspace};
    use crate::persistence::save_channel;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::task::LocalSet;

    fn temp_path() -> PathBuf {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!("replaykv_test_{}_{}.resp", std::process::id(), n))
    }

    fn put(keyspace: &SharedKeyspace, key: &str, entry: Entry) {
        keyspace.borrow_mut().set(Bytes::from(key.to_string()), entry);
    }

    fn value(s: &str) -> Bytes {
        Bytes::from(s.to_string())
    }

    #[test]
    fn test_tmp_path_appends_suffix() {
        assert_eq!(tmp_path(Path::new("/data/dump.resp")), PathBuf::from("/data/dump.resp.tmp"));
    }

    #[test]
    fn test_encode_is_flushdb_then_sets() {
        let keyspace = Keyspace::shared();
        put(&keyspace, "a", Entry::new(value("1")));
        put(&keyspace, "b", Entry::new(value("2")));

        let bytes = Snapshotter::new(keyspace, None).encode().unwrap();
        assert_eq!(
            bytes,
            b"*1\r\n$7\r\nFLUSHDB\r\n\
              *3\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\n1\r\n\
              *3\r\n$3\r\nSET\r\n$1\r\nb\r\n$1\r\n2\r\n"
                .to_vec()
        );
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let path = temp_path();
        let source = Keyspace::shared();
        put(&source, "plain", Entry::new(value("v1")));
        put(&source, "binary", Entry::new(Bytes::from_static(b"a\r\nb\0c")));
        put(&source, "ttl", Entry::with_expiry(value("v2"), now_millis() + 60_000));
        put(&source, "dead", Entry::with_expiry(value("v3"), 1));

        let saver = Snapshotter::new(source.clone(), Some(path.clone()));
        assert!(saver.save().await.unwrap());
        assert!(!source.borrow().is_dirty());
        assert!(!tmp_path(&path).exists());

        let target = Keyspace::shared();
        put(&target, "stale", Entry::new(value("x")));
        let loader = Snapshotter::new(target.clone(), Some(path.clone()));
        assert_eq!(loader.load().await, 4);

        let ks = target.borrow();
        assert_eq!(ks.len(), 3);
        assert!(!ks.contains(b"stale"));
        assert!(!ks.contains(b"dead"));
        assert_eq!(ks.get(b"binary").unwrap().value, Bytes::from_static(b"a\r\nb\0c"));

        let remaining = ks.get(b"ttl").unwrap().remaining_ms(now_millis()).unwrap();
        assert!(remaining > 0 && remaining <= 60_000);
        assert_eq!(ks.get(b"plain").unwrap().expire_at, None);
        assert!(!ks.is_dirty());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_save_skips_clean_keyspace() {
        let path = temp_path();
        let keyspace = Keyspace::shared();
        let saver = Snapshotter::new(keyspace.clone(), Some(path.clone()));

        assert!(!saver.save().await.unwrap());
        assert!(!path.exists());

        put(&keyspace, "k", Entry::new(value("v")));
        assert!(saver.save().await.unwrap());
        assert!(!saver.save().await.unwrap());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_save_without_path_is_noop() {
        let keyspace = Keyspace::shared();
        put(&keyspace, "k", Entry::new(value("v")));

        let saver = Snapshotter::new(keyspace.clone(), None);
        assert!(!saver.save().await.unwrap());
        assert!(keyspace.borrow().is_dirty());
    }

    #[tokio::test]
    async fn test_failed_save_restores_dirty() {
        // A directory in place of the parent makes the write fail.
        let blocker = temp_path();
        std::fs::write(&blocker, b"not a directory").unwrap();
        let path = blocker.join("dump.resp");

        let keyspace = Keyspace::shared();
        put(&keyspace, "k", Entry::new(value("v")));
        let saver = Snapshotter::new(keyspace.clone(), Some(path));

        assert!(saver.save().await.is_err());
        assert!(keyspace.borrow().is_dirty());

        let _ = std::fs::remove_file(&blocker);
    }

    #[tokio::test]
    async fn test_load_missing_file_starts_empty() {
        let keyspace = Keyspace::shared();
        let loader = Snapshotter::new(keyspace.clone(), Some(temp_path()));
        assert_eq!(loader.load().await, 0);
        assert!(keyspace.borrow().is_empty());
        assert!(!keyspace.borrow().is_dirty());
    }

    #[tokio::test]
    async fn test_load_corrupt_file_starts_empty() {
        let path = temp_path();
        std::fs::write(&path, b"*1\r\n$7\r\nFLUSHDB\r\n*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n!garbage").unwrap();

        let keyspace = Keyspace::shared();
        let loader = Snapshotter::new(keyspace.clone(), Some(path.clone()));
        assert_eq!(loader.load().await, 0);
        assert!(keyspace.borrow().is_empty());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_load_truncated_file_starts_empty() {
        let path = temp_path();
        std::fs::write(&path, b"*1\r\n$7\r\nFLUSHDB\r\n*3\r\n$3\r\nSET\r\n$1\r\nk\r\n").unwrap();

        let keyspace = Keyspace::shared();
        let loader = Snapshotter::new(keyspace.clone(), Some(path.clone()));
        assert_eq!(loader.load().await, 0);
        assert!(keyspace.borrow().is_empty());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_save_request_is_serviced_by_task() {
        let path = temp_path();
        let keyspace = Keyspace::shared();
        put(&keyspace, "k", Entry::new(value("v")));

        let snapshotter = Rc::new(Snapshotter::new(keyspace.clone(), Some(path.clone())));
        let (trigger, requests) = save_channel();

        LocalSet::new()
            .run_until(async {
                let config = SnapshotConfig { interval: None };
                let scheduler = SnapshotScheduler::start(snapshotter.clone(), config, requests);

                trigger.request();
                trigger.request();
                tokio::time::sleep(Duration::from_millis(100)).await;
                assert!(path.exists());
                assert!(!keyspace.borrow().is_dirty());

                put(&keyspace, "later", Entry::new(value("v")));
                scheduler.shutdown().await;
            })
            .await;

        // The final save on shutdown picked up the second key.
        let reloaded = Keyspace::shared();
        Snapshotter::new(reloaded.clone(), Some(path.clone())).load().await;
        assert!(reloaded.borrow().contains(b"later"));

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_periodic_save() {
        let path = temp_path();
        let keyspace = Keyspace::shared();
        let snapshotter = Rc::new(Snapshotter::new(keyspace.clone(), Some(path.clone())));

        LocalSet::new()
            .run_until(async {
                let config = SnapshotConfig {
                    interval: Some(Duration::from_millis(20)),
                };
                let (_trigger, requests) = save_channel();
                let _scheduler = SnapshotScheduler::start(snapshotter, config, requests);

                put(&keyspace, "k", Entry::new(value("v")));
                tokio::time::sleep(Duration::from_millis(150)).await;
            })
            .await;

        assert!(path.exists());
        assert!(!keyspace.borrow().is_dirty());
        let _ = std::fs::remove_file(&path);
    }
}
