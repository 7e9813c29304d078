//! Connection Module
//!
//! Byte streams in, replies out.
//!
//! ```text
//!  ┌───────────────────────────────────────────────────────────┐
//!  │                   ConnectionHandler                       │
//!  │                                                           │
//!  │   read ──> ┌──────────────────── Pipeline ─────────────┐  │
//!  │            │ FrameDecoder ──> CommandHandler ──> encode│  │
//!  │            └───────────────────────────────────┬───────┘  │
//!  │                                                ▼          │
//!  │                                          write replies    │
//!  └───────────────────────────────────────────────────────────┘
//! ```
//!
//! [`Pipeline`] is also what the persistence layer uses to write and replay
//! snapshots, with a file (or nothing) in place of the socket.

pub mod handler;
pub mod pipeline;

pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionState};
pub use pipeline::Pipeline;
