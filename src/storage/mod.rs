//! Storage Module
//!
//! The [`Keyspace`] store, the glob matcher used by `KEYS`/`SCAN`, and the
//! periodic [`ExpiryReaper`].
//!
//! ## Example
//!
//! ```
//! use replaykv::storage::{Entry, Keyspace};
//! use bytes::Bytes;
//!
//! let keyspace = Keyspace::shared();
//! keyspace
//!     .borrow_mut()
//!     .set(Bytes::from("name"), Entry::new(Bytes::from("replay")));
//!
//! assert!(keyspace.borrow().contains(b"name"));
//! assert!(keyspace.borrow().is_dirty());
//! ```

pub mod expiry;
pub mod keyspace;
pub mod pattern;

pub use expiry::{reap_expired, ExpiryConfig, ExpiryReaper};
pub use keyspace::{now_millis, Entry, Keyspace, SharedKeyspace};
pub use pattern::GlobPattern;
