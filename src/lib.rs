//! # replaykv
//!
//! A single-process, in-memory key-value server that speaks RESP2 and
//! persists itself by replaying its own command stream.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                  current-thread runtime + LocalSet                  │
//! │                                                                     │
//! │  ┌────────┐   ┌───────────────────────── Pipeline ───────────────┐  │
//! │  │ Server │──>│ FrameDecoder ──> CommandHandler ──> reply encoder│  │
//! │  └────────┘   └─────────────────────────┬────────────────────────┘  │
//! │                                         ▼                           │
//! │                           ┌──────────────────────────┐              │
//! │                           │ Keyspace (Rc<RefCell<_>>)│              │
//! │                           └──────────────────────────┘              │
//! │                              ▲                   ▲                  │
//! │                 ┌────────────┴───┐      ┌────────┴──────────┐       │
//! │                 │ ExpiryReaper   │      │ SnapshotScheduler │       │
//! │                 │ (timer)        │      │ (timer + SAVE)    │       │
//! │                 └────────────────┘      └───────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything runs on one thread. A command borrows the keyspace for its
//! whole synchronous execution, so commands never interleave and no locks
//! are needed.
//!
//! ## Replay persistence
//!
//! `DUMPALL` replies with a `FLUSHDB` command followed by one `SET` per live
//! key. A snapshot file is exactly those encoded replies; loading it feeds
//! the file back through the decoder and dispatcher as if a client had sent
//! it.
//!
//! ## Expiry
//!
//! Keys carry an absolute expiry in Unix milliseconds. Reads do not check
//! it: an expired key stays visible until the next reaper sweep removes it.
//!
//! ## Modules
//!
//! - [`protocol`]: RESP values, encoder and the incremental decoder
//! - [`storage`]: keyspace, glob patterns, expiry reaper
//! - [`commands`]: command table and handlers
//! - [`connection`]: per-client stream handling and the shared pipeline
//! - [`persistence`]: snapshot save/load and the snapshot task
//! - [`server`]: the TCP accept loop
//! - [`config`]: command-line options

pub mod commands;
pub mod config;
pub mod connection;
pub mod persistence;
pub mod protocol;
pub mod server;
pub mod storage;

pub use commands::{CommandHandler, Outcome};
pub use config::Config;
pub use connection::{handle_connection, ConnectionError, ConnectionHandler, Pipeline};
pub use persistence::{save_channel, SaveRequests, SaveTrigger, SnapshotConfig, SnapshotScheduler, Snapshotter};
pub use protocol::{DecodeError, FrameDecoder, RespValue};
pub use server::Server;
pub use storage::{ExpiryConfig, ExpiryReaper, Keyspace, SharedKeyspace};

/// Default listening port (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// Default bind address
pub const DEFAULT_HOST: &str = "127.0.0.1";

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
