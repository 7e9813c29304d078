//! Command Module
//!
//! Executes decoded frames against the keyspace.
//!
//! ```text
//!   FrameDecoder ──frame──> CommandHandler ──> Outcome
//!                                 │
//!                                 ▼
//!                          SharedKeyspace
//! ```
//!
//! One [`CommandHandler`] exists per connection (plus one per load or save
//! replay). Handlers are stateless apart from the connection name, so any
//! number of them can share the keyspace.

pub mod handler;

pub use handler::{lookup, CommandFn, CommandHandler, Outcome, COMMANDS};
