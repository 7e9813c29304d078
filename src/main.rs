//! replaykv server entry point.

use clap::Parser;
use replaykv::persistence::{save_channel, SnapshotScheduler, Snapshotter};
use replaykv::storage::{ExpiryReaper, Keyspace};
use replaykv::{Config, Server};
use std::rc::Rc;
use tokio::signal;
use tokio::task::LocalSet;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    LocalSet::new().run_until(serve(config)).await
}

async fn serve(config: Config) -> anyhow::Result<()> {
    info!(version = replaykv::VERSION, "Starting replaykv");

    let keyspace = Keyspace::shared();
    let snapshotter = Rc::new(Snapshotter::new(keyspace.clone(), config.snapshot_path()));
    if snapshotter.path().is_none() {
        info!("No snapshot file configured, persistence disabled");
    }
    snapshotter.load().await;

    let (save_trigger, save_requests) = save_channel();
    let server = Server::bind(config.bind_address(), keyspace.clone(), save_trigger).await?;

    let reaper = ExpiryReaper::start(keyspace.clone(), config.expiry_config());
    let scheduler = SnapshotScheduler::start(snapshotter, config.snapshot_config(), save_requests);

    tokio::select! {
        _ = server.run() => {}
        result = signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Shutdown signal received"),
                Err(e) => error!(error = %e, "Failed to listen for Ctrl+C"),
            }
        }
    }

    reaper.stop();
    scheduler.shutdown().await;

    info!(keys = keyspace.borrow().len(), "Server shutdown complete");
    Ok(())
}
