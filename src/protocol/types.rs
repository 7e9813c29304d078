//! RESP value model and reply encoder.
//!
//! A [`RespValue`] is what the [`FrameDecoder`](super::FrameDecoder) emits
//! and what command handlers hand back. Encoding a value with
//! [`RespValue::serialize`] and decoding the bytes again yields the same
//! value; the snapshot format depends on that. The one exception is CR or
//! LF inside a status or error line, which go out as spaces.
//!
//! ## Wire format
//!
//! ```text
//! +OK\r\n                    simple string
//! -ERR syntax error\r\n      error
//! :1000\r\n                  integer
//! $5\r\nhello\r\n            bulk string
//! $-1\r\n                    null
//! *-1\r\n                    null array
//! *2\r\n$3\r\nGET\r\n$1\r\nk\r\n   array
//! ```

use bytes::Bytes;
use std::fmt;

/// Line terminator.
pub const CRLF: &[u8] = b"\r\n";

/// Leading type bytes.
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A decoded protocol value or an outgoing reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Status line: `+<text>\r\n`. CR and LF in the text are sent as spaces.
    SimpleString(String),

    /// Error line: `-<text>\r\n`. CR and LF in the text are sent as spaces.
    Error(String),

    /// Signed integer line: `:<n>\r\n`
    Integer(i64),

    /// Length-prefixed, binary-safe payload: `$<len>\r\n<bytes>\r\n`
    BulkString(Bytes),

    /// Null bulk string: `$-1\r\n`
    Null,

    /// Null array: `*-1\r\n`. Only produced by the decoder.
    NullArray,

    /// Count-prefixed sequence, possibly nested: `*<n>\r\n<items...>`
    Array(Vec<RespValue>),
}

impl RespValue {
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    pub fn null() -> Self {
        RespValue::Null
    }

    pub fn array(values: Vec<RespValue>) -> Self {
        RespValue::Array(values)
    }

    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    pub fn pong() -> Self {
        RespValue::SimpleString("PONG".to_string())
    }

    /// Builds a command frame: an array of bulk strings.
    ///
    /// ```
    /// use replaykv::protocol::RespValue;
    /// let cmd = RespValue::command(["SET", "k", "v"]);
    /// assert_eq!(cmd.serialize(), b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n");
    /// ```
    pub fn command<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        RespValue::Array(
            args.into_iter()
                .map(|a| RespValue::BulkString(a.into()))
                .collect(),
        )
    }

    /// Encodes the value into a fresh buffer.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Encodes the value onto the end of `buf`.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => write_text_line(buf, prefix::SIMPLE_STRING, s),
            RespValue::Error(s) => write_text_line(buf, prefix::ERROR, s),
            RespValue::Integer(n) => write_line(buf, prefix::INTEGER, n.to_string().as_bytes()),
            RespValue::BulkString(data) => {
                write_line(buf, prefix::BULK_STRING, data.len().to_string().as_bytes());
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            RespValue::Null => write_line(buf, prefix::BULK_STRING, b"-1"),
            RespValue::NullArray => write_line(buf, prefix::ARRAY, b"-1"),
            RespValue::Array(values) => {
                write_line(buf, prefix::ARRAY, values.len().to_string().as_bytes());
                for value in values {
                    value.serialize_into(buf);
                }
            }
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::Null | RespValue::NullArray)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    /// Bytes of a bulk or simple string, or the decimal text of an integer.
    ///
    /// Command arguments arrive as bulk strings, but a frame built by hand
    /// may carry any scalar, so handlers read arguments through this.
    pub fn to_bytes(&self) -> Option<Bytes> {
        match self {
            RespValue::BulkString(b) => Some(b.clone()),
            RespValue::SimpleString(s) => Some(Bytes::from(s.clone())),
            RespValue::Integer(n) => Some(Bytes::from(n.to_string())),
            _ => None,
        }
    }

    /// Text view of a bulk or simple string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RespValue::SimpleString(s) => Some(s),
            RespValue::BulkString(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Parses the value as a signed integer.
    pub fn to_integer(&self) -> Option<i64> {
        match self {
            RespValue::Integer(n) => Some(*n),
            other => other.as_str().and_then(|s| s.parse().ok()),
        }
    }

    pub fn as_array(&self) -> Option<&[RespValue]> {
        match self {
            RespValue::Array(arr) => Some(arr),
            _ => None,
        }
    }
}

fn write_line(buf: &mut Vec<u8>, tag: u8, body: &[u8]) {
    buf.push(tag);
    buf.extend_from_slice(body);
    buf.extend_from_slice(CRLF);
}

/// Line-oriented text may not contain a terminator, or one reply would
/// read as several on the wire.
fn write_text_line(buf: &mut Vec<u8>, tag: u8, text: &str) {
    buf.push(tag);
    buf.extend(text.bytes().map(|b| match b {
        b'\r' | b'\n' => b' ',
        other => other,
    }));
    buf.extend_from_slice(CRLF);
}

impl fmt::Display for RespValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RespValue::SimpleString(s) => write!(f, "{}", s),
            RespValue::Error(s) => write!(f, "(error) {}", s),
            RespValue::Integer(n) => write!(f, "(integer) {}", n),
            RespValue::BulkString(data) => write!(f, "\"{}\"", String::from_utf8_lossy(data)),
            RespValue::Null | RespValue::NullArray => write!(f, "(nil)"),
            RespValue::Array(values) => {
                let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}
