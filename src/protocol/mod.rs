//! RESP Protocol Implementation
//!
//! - `types`: the [`RespValue`] model and the reply encoder
//! - `decoder`: the chunk-tolerant [`FrameDecoder`]
//!
//! ## Example
//!
//! ```
//! use replaykv::protocol::{FrameDecoder, RespValue};
//! use std::ops::ControlFlow;
//!
//! let mut decoder = FrameDecoder::new();
//! let mut frames = Vec::new();
//! for chunk in [&b"*2\r\n$3\r\nGE"[..], &b"T\r\n$4\r\nname\r\n"[..]] {
//!     decoder
//!         .feed(chunk, |frame| {
//!             frames.push(frame);
//!             ControlFlow::Continue(())
//!         })
//!         .unwrap();
//! }
//! assert_eq!(frames, vec![RespValue::command(["GET", "name"])]);
//! ```

pub mod decoder;
pub mod types;

pub use decoder::{decode_all, DecodeError, FrameDecoder};
pub use types::RespValue;
