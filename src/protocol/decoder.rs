//! Incremental RESP Frame Decoder
//!
//! Bytes arrive from a socket (or a snapshot file) in chunks of arbitrary
//! size. The decoder keeps just enough state between calls to resume at any
//! byte: mid-tag, mid-digit, mid-body or between the CR and LF of a
//! terminator. Nothing is ever rolled back or re-scanned.
//!
//! ## State
//!
//! ```text
//!  ┌─────┐  tag byte   ┌──────────┐  CRLF   ┌──────────┐
//!  │ Tag │────────────>│ Line(tag)│────────>│ complete │──┐
//!  └─────┘             └────┬─────┘         └──────────┘  │
//!     ▲                     │ $<len>                      │
//!     │                ┌────▼─────┐  len   ┌────────────┐ │
//!     │                │   Body   │───────>│ Terminator │─┘
//!     │                └──────────┘        └────────────┘
//!     └──────────────────────────────────────────────────┘
//! ```
//!
//! Arrays are assembled on an explicit stack of [`PendingArray`] records
//! rather than through recursion, so nesting depth is bounded only by memory.
//!
//! Every frame that completes at the top level is handed to the caller's
//! callback before the rest of the chunk is looked at. The callback returns
//! a [`ControlFlow`]; `Break` stops decoding and drops the unread bytes.

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::BytesMut;
use std::ops::ControlFlow;
use thiserror::Error;

/// Largest bulk payload accepted (512 MB).
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Longest header or status line accepted, terminator excluded (64 KB).
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Upper bound on the capacity reserved up front for an announced array.
const MAX_PREALLOC_ITEMS: usize = 1024;

/// Protocol faults. Every variant is fatal for the stream that produced it.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecodeError {
    #[error("unrecognized type byte: {0:#04x}")]
    UnknownType(u8),

    #[error("invalid integer: {0:?}")]
    InvalidInteger(String),

    #[error("invalid UTF-8 in line")]
    InvalidUtf8,

    #[error("invalid length: {0}")]
    InvalidLength(i64),

    #[error("bulk string too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },

    #[error("expected CRLF terminator")]
    MissingTerminator,

    #[error("line too long: more than {max} bytes")]
    LineTooLong { max: usize },
}

/// Where the decoder is within the current item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Waiting for a type byte.
    Tag,
    /// Accumulating the line that follows `tag`.
    Line(u8),
    /// Copying a bulk payload.
    Body { remaining: usize },
    /// Consuming the CRLF after a bulk payload; `seen` bytes matched so far.
    Terminator { seen: usize },
}

/// An array whose elements are still arriving.
#[derive(Debug)]
struct PendingArray {
    expected: usize,
    items: Vec<RespValue>,
}

/// Per-stream decoder state.
#[derive(Debug)]
pub struct FrameDecoder {
    state: State,
    line: Vec<u8>,
    body: BytesMut,
    stack: Vec<PendingArray>,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: State::Tag,
            line: Vec::new(),
            body: BytesMut::new(),
            stack: Vec::new(),
        }
    }

    /// True when no partial frame is buffered.
    pub fn is_idle(&self) -> bool {
        self.state == State::Tag && self.stack.is_empty()
    }

    /// Depth of the in-progress array stack.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Feeds one chunk, calling `on_frame` for each completed top-level frame.
    ///
    /// Returns `ControlFlow::Break(())` if the callback asked to stop; any
    /// bytes after that frame are discarded.
    pub fn feed<F>(&mut self, chunk: &[u8], mut on_frame: F) -> Result<ControlFlow<()>, DecodeError>
    where
        F: FnMut(RespValue) -> ControlFlow<()>,
    {
        let mut pos = 0;

        while pos < chunk.len() {
            match self.state {
                State::Tag => {
                    let byte = chunk[pos];
                    pos += 1;
                    match byte {
                        // keep-alive
                        b'\r' | b'\n' => {}
                        prefix::ARRAY
                        | prefix::BULK_STRING
                        | prefix::INTEGER
                        | prefix::SIMPLE_STRING
                        | prefix::ERROR => self.state = State::Line(byte),
                        other => return Err(DecodeError::UnknownType(other)),
                    }
                }
                State::Line(tag) => {
                    let rest = &chunk[pos..];
                    let newline = rest.iter().position(|&b| b == b'\n');
                    let take = newline.unwrap_or(rest.len());
                    // one extra byte for the CR that ends the line
                    if self.line.len() + take > MAX_LINE_LEN + 1 {
                        return Err(DecodeError::LineTooLong { max: MAX_LINE_LEN });
                    }
                    match newline {
                        Some(i) => {
                            self.line.extend_from_slice(&rest[..i]);
                            pos += i + 1;
                            if self.line.pop() != Some(b'\r') {
                                return Err(DecodeError::MissingTerminator);
                            }
                            let line = std::mem::take(&mut self.line);
                            self.state = State::Tag;
                            if let Some(item) = self.finish_line(tag, &line)? {
                                if self.complete(item, &mut on_frame).is_break() {
                                    return Ok(ControlFlow::Break(()));
                                }
                            }
                        }
                        None => {
                            self.line.extend_from_slice(rest);
                            pos = chunk.len();
                        }
                    }
                }
                State::Body { remaining } => {
                    let take = remaining.min(chunk.len() - pos);
                    self.body.extend_from_slice(&chunk[pos..pos + take]);
                    pos += take;
                    self.state = if take == remaining {
                        State::Terminator { seen: 0 }
                    } else {
                        State::Body {
                            remaining: remaining - take,
                        }
                    };
                }
                State::Terminator { seen } => {
                    if chunk[pos] != CRLF[seen] {
                        return Err(DecodeError::MissingTerminator);
                    }
                    pos += 1;
                    if seen + 1 < CRLF.len() {
                        self.state = State::Terminator { seen: seen + 1 };
                        continue;
                    }
                    self.state = State::Tag;
                    let item = RespValue::BulkString(self.body.split().freeze());
                    if self.complete(item, &mut on_frame).is_break() {
                        return Ok(ControlFlow::Break(()));
                    }
                }
            }
        }

        Ok(ControlFlow::Continue(()))
    }

    /// Interprets a finished line. Returns the item it completes, if any.
    fn finish_line(&mut self, tag: u8, line: &[u8]) -> Result<Option<RespValue>, DecodeError> {
        match tag {
            prefix::ARRAY => match parse_length(line)? {
                None => Ok(Some(RespValue::NullArray)),
                Some(0) => Ok(Some(RespValue::Array(Vec::new()))),
                Some(count) => {
                    self.stack.push(PendingArray {
                        expected: count,
                        items: Vec::with_capacity(count.min(MAX_PREALLOC_ITEMS)),
                    });
                    Ok(None)
                }
            },
            prefix::BULK_STRING => match parse_length(line)? {
                None => Ok(Some(RespValue::Null)),
                Some(len) if len > MAX_BULK_SIZE => Err(DecodeError::TooLarge {
                    size: len,
                    max: MAX_BULK_SIZE,
                }),
                Some(0) => {
                    self.state = State::Terminator { seen: 0 };
                    Ok(None)
                }
                Some(len) => {
                    self.body.reserve(len.min(64 * 1024));
                    self.state = State::Body { remaining: len };
                    Ok(None)
                }
            },
            prefix::INTEGER => parse_integer(line).map(|n| Some(RespValue::Integer(n))),
            prefix::SIMPLE_STRING => Ok(Some(RespValue::SimpleString(to_text(line)?))),
            prefix::ERROR => Ok(Some(RespValue::Error(to_text(line)?))),
            other => Err(DecodeError::UnknownType(other)),
        }
    }

    /// Attaches a completed item to the innermost open array, folding
    /// finished arrays upward until one is still short of its count or the
    /// stack is empty (a top-level frame).
    fn complete<F>(&mut self, mut item: RespValue, on_frame: &mut F) -> ControlFlow<()>
    where
        F: FnMut(RespValue) -> ControlFlow<()>,
    {
        loop {
            let Some(top) = self.stack.last_mut() else {
                return on_frame(item);
            };
            top.items.push(item);
            if top.items.len() < top.expected {
                return ControlFlow::Continue(());
            }
            let items = std::mem::take(&mut top.items);
            self.stack.pop();
            item = RespValue::Array(items);
        }
    }
}

fn to_text(line: &[u8]) -> Result<String, DecodeError> {
    std::str::from_utf8(line)
        .map(str::to_owned)
        .map_err(|_| DecodeError::InvalidUtf8)
}

fn parse_integer(line: &[u8]) -> Result<i64, DecodeError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| DecodeError::InvalidInteger(String::from_utf8_lossy(line).into_owned()))
}

/// `None` for the `-1` null marker.
fn parse_length(line: &[u8]) -> Result<Option<usize>, DecodeError> {
    match parse_integer(line)? {
        -1 => Ok(None),
        n if n < 0 => Err(DecodeError::InvalidLength(n)),
        n => Ok(Some(n as usize)),
    }
}

/// Decodes every complete frame in `buf`, ignoring a trailing partial one.
pub fn decode_all(buf: &[u8]) -> Result<Vec<RespValue>, DecodeError> {
    let mut frames = Vec::new();
    FrameDecoder::new().feed(buf, |frame| {
        frames.push(frame);
        ControlFlow::Continue(())
    })?;
    Ok(frames)
}
