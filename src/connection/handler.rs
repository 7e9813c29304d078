//! Connection Handler
//!
//! Drives one client stream through its lifecycle:
//!
//! ```text
//!   Open ──run()──> Active ──EOF / QUIT / error──> Closing ──shutdown──> Closed
//!     │                                               ▲
//!     └───────────────────────────────────────────────┘
//! ```
//!
//! While `Active`, each read is handed to the [`Pipeline`] in full. Commands
//! that complete inside the chunk execute immediately and their replies are
//! written back as one batch before the next read. Every exit from `Active`
//! goes through `Closing`, where the write half is shut down, and the
//! handler is then dropped along with its decoder state.

use crate::commands::CommandHandler;
use crate::connection::pipeline::Pipeline;
use crate::protocol::DecodeError;
use bytes::BytesMut;
use std::ops::ControlFlow;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, info, trace, warn};

/// Read buffer capacity per connection.
const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Active,
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Open, Active) | (Open, Closing) | (Active, Closing) | (Closing, Closed)
        )
    }
}

/// Handles a single client stream.
pub struct ConnectionHandler<S> {
    stream: BufWriter<S>,
    buffer: BytesMut,
    replies: Vec<u8>,
    pipeline: Pipeline,
    state: ConnectionState,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, handler: CommandHandler) -> Self {
        Self {
            stream: BufWriter::new(stream),
            buffer: BytesMut::with_capacity(READ_BUFFER_SIZE),
            replies: Vec::new(),
            pipeline: Pipeline::new(handler),
            state: ConnectionState::Open,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn name(&self) -> &str {
        self.pipeline.handler().name()
    }

    fn transition(&mut self, next: ConnectionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        trace!(client = %self.name(), from = ?self.state, to = ?next, "Connection state change");
        self.state = next;
    }

    /// Runs the connection until the client leaves, sends `QUIT`, or a
    /// fault occurs. The stream is always shut down before returning.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        self.transition(ConnectionState::Active);
        info!(client = %self.name(), "Client connected");

        let result = self.main_loop().await;

        self.transition(ConnectionState::Closing);
        if let Err(e) = self.stream.shutdown().await {
            trace!(client = %self.name(), error = %e, "Shutdown failed");
        }
        self.transition(ConnectionState::Closed);

        let commands = self.pipeline.commands();
        match &result {
            Ok(()) => info!(client = %self.name(), commands, "Client quit"),
            Err(ConnectionError::ClientDisconnected) => {
                info!(client = %self.name(), commands, "Client disconnected")
            }
            Err(ConnectionError::Io(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.name(), "Connection reset by client")
            }
            Err(e) => warn!(client = %self.name(), error = %e, commands, "Connection closed on error"),
        }

        result
    }

    /// The read-execute-respond loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            self.buffer.clear();
            let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;

            if n == 0 {
                return if self.pipeline.is_idle() {
                    Err(ConnectionError::ClientDisconnected)
                } else {
                    Err(ConnectionError::UnexpectedEof)
                };
            }
            trace!(client = %self.name(), bytes = n, "Read data");

            self.replies.clear();
            let flow = self.pipeline.process(&self.buffer, Some(&mut self.replies));
            self.flush_replies().await?;

            if flow? == ControlFlow::Break(()) {
                return Ok(());
            }
        }
    }

    async fn flush_replies(&mut self) -> Result<(), ConnectionError> {
        if self.replies.is_empty() {
            return Ok(());
        }
        self.stream.write_all(&self.replies).await?;
        self.stream.flush().await?;
        trace!(client = %self.name(), bytes = self.replies.len(), "Sent replies");
        Ok(())
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed input; the stream is not resynchronized.
    #[error("protocol error: {0}")]
    Decode(#[from] DecodeError),

    #[error("client disconnected")]
    ClientDisconnected,

    /// The stream ended inside a frame.
    #[error("unexpected end of stream")]
    UnexpectedEof,
}

/// Runs a connection to completion, logging instead of returning errors.
pub async fn handle_connection<S>(stream: S, handler: CommandHandler)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let name = handler.name().to_string();
    if let Err(e) = ConnectionHandler::new(stream, handler).run().await {
        match e {
            ConnectionError::ClientDisconnected => {}
            _ => debug!(client = %name, error = %e, "Connection ended with error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Keyspace, SharedKeyspace};
    use tokio_test::io::Builder;

    fn handler(keyspace: &SharedKeyspace) -> CommandHandler {
        CommandHandler::new(keyspace.clone(), "mock")
    }

    #[test]
    fn test_state_transitions() {
        use ConnectionState::*;
        assert!(Open.can_transition_to(Active));
        assert!(Active.can_transition_to(Closing));
        assert!(Closing.can_transition_to(Closed));
        assert!(!Closed.can_transition_to(Active));
        assert!(!Active.can_transition_to(Open));
        assert!(!Open.can_transition_to(Closed));
    }

    #[test]
    fn test_new_connection_is_open() {
        let keyspace = Keyspace::shared();
        let mock = Builder::new().build();
        let conn = ConnectionHandler::new(mock, handler(&keyspace));
        assert_eq!(conn.state(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let keyspace = Keyspace::shared();
        let mock = Builder::new()
            .read(b"*1\r\n$4\r\nPING\r\n")
            .write(b"+PONG\r\n")
            .build();

        let result = ConnectionHandler::new(mock, handler(&keyspace)).run().await;
        assert!(matches!(result, Err(ConnectionError::ClientDisconnected)));
    }

    #[tokio::test]
    async fn test_command_split_across_reads() {
        let keyspace = Keyspace::shared();
        let mock = Builder::new()
            .read(b"*3\r\n$3\r\nSET\r\n$3\r\nfo")
            .read(b"o\r\n$3\r\nba")
            .read(b"r\r\n")
            .write(b"+OK\r\n")
            .build();

        let result = ConnectionHandler::new(mock, handler(&keyspace)).run().await;
        assert!(matches!(result, Err(ConnectionError::ClientDisconnected)));
        assert_eq!(
            keyspace.borrow().get(b"foo").map(|e| e.value.clone()),
            Some(bytes::Bytes::from("bar"))
        );
    }

    #[tokio::test]
    async fn test_pipelined_replies_in_order() {
        let keyspace = Keyspace::shared();
        let mock = Builder::new()
            .read(b"*3\r\n$3\r\nSET\r\n$2\r\nk1\r\n$2\r\nv1\r\n*2\r\n$3\r\nGET\r\n$2\r\nk1\r\n*2\r\n$3\r\nGET\r\n$2\r\nk2\r\n")
            .write(b"+OK\r\n$2\r\nv1\r\n$-1\r\n")
            .build();

        let result = ConnectionHandler::new(mock, handler(&keyspace)).run().await;
        assert!(matches!(result, Err(ConnectionError::ClientDisconnected)));
    }

    #[tokio::test]
    async fn test_quit_ends_session_cleanly() {
        let keyspace = Keyspace::shared();
        let mock = Builder::new()
            .read(b"*1\r\n$4\r\nPING\r\n*1\r\n$4\r\nQUIT\r\n*1\r\n$4\r\nPING\r\n")
            .write(b"+PONG\r\n")
            .build();

        let result = ConnectionHandler::new(mock, handler(&keyspace)).run().await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_type_byte_is_fatal() {
        let keyspace = Keyspace::shared();
        let mock = Builder::new()
            .read(b"*1\r\n$4\r\nPING\r\n@oops\r\n")
            .write(b"+PONG\r\n")
            .build();

        let result = ConnectionHandler::new(mock, handler(&keyspace)).run().await;
        assert!(matches!(
            result,
            Err(ConnectionError::Decode(DecodeError::UnknownType(b'@')))
        ));
    }

    #[tokio::test]
    async fn test_unknown_command_keeps_connection() {
        let keyspace = Keyspace::shared();
        let mock = Builder::new()
            .read(b"*1\r\n$4\r\nNOPE\r\n")
            .write(b"-UNKNOWN COMMAND NOPE\r\n")
            .read(b"*1\r\n$4\r\nPING\r\n")
            .write(b"+PONG\r\n")
            .build();

        let result = ConnectionHandler::new(mock, handler(&keyspace)).run().await;
        assert!(matches!(result, Err(ConnectionError::ClientDisconnected)));
    }

    #[tokio::test]
    async fn test_eof_mid_frame() {
        let keyspace = Keyspace::shared();
        let mock = Builder::new().read(b"*2\r\n$3\r\nGET\r\n").build();

        let result = ConnectionHandler::new(mock, handler(&keyspace)).run().await;
        assert!(matches!(result, Err(ConnectionError::UnexpectedEof)));
    }

    #[tokio::test]
    async fn test_read_error_tears_down() {
        let keyspace = Keyspace::shared();
        let mock = Builder::new()
            .read_error(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"))
            .build();

        let result = ConnectionHandler::new(mock, handler(&keyspace)).run().await;
        assert!(matches!(result, Err(ConnectionError::Io(_))));
    }

    #[tokio::test]
    async fn test_client_setname_renames_connection() {
        let keyspace = Keyspace::shared();
        let mock = Builder::new()
            .read(b"*3\r\n$6\r\nCLIENT\r\n$7\r\nSETNAME\r\n$3\r\nbob\r\n*2\r\n$6\r\nCLIENT\r\n$7\r\nGETNAME\r\n")
            .write(b"+OK\r\n$3\r\nbob\r\n")
            .build();

        handle_connection(mock, handler(&keyspace)).await;
    }
}
