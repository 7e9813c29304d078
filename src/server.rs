//! TCP accept loop.
//!
//! Every accepted socket becomes a local task running a
//! [`ConnectionHandler`](crate::connection::ConnectionHandler). All of them
//! share one keyspace and one save trigger.

use crate::commands::CommandHandler;
use crate::connection::handle_connection;
use crate::persistence::SaveTrigger;
use crate::storage::SharedKeyspace;
use std::io;
use std::net::SocketAddr;
use tokio::net::{TcpListener, ToSocketAddrs};
use tracing::{error, info};

pub struct Server {
    listener: TcpListener,
    keyspace: SharedKeyspace,
    save_trigger: SaveTrigger,
}

impl Server {
    pub async fn bind(
        addr: impl ToSocketAddrs,
        keyspace: SharedKeyspace,
        save_trigger: SaveTrigger,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            keyspace,
            save_trigger,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections forever. Must run inside a `LocalSet`.
    pub async fn run(self) {
        if let Ok(addr) = self.local_addr() {
            info!(addr = %addr, "Listening");
        }

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let _ = stream.set_nodelay(true);
                    let handler = CommandHandler::new(self.keyspace.clone(), addr.to_string())
                        .with_save_trigger(self.save_trigger.clone());
                    tokio::task::spawn_local(handle_connection(stream, handler));
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::save_channel;
    use crate::storage::Keyspace;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::task::LocalSet;

    async fn start(keyspace: SharedKeyspace, trigger: SaveTrigger) -> SocketAddr {
        let server = Server::bind("127.0.0.1:0", keyspace, trigger).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::task::spawn_local(server.run());
        addr
    }

    async fn read_exact_len(client: &mut TcpStream, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        tokio::time::timeout(Duration::from_secs(2), client.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        buf
    }

    #[tokio::test]
    async fn test_ping_over_tcp() {
        LocalSet::new()
            .run_until(async {
                let addr = start(Keyspace::shared(), save_channel().0).await;
                let mut client = TcpStream::connect(addr).await.unwrap();

                client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
                assert_eq!(read_exact_len(&mut client, 7).await, b"+PONG\r\n");
            })
            .await;
    }

    #[tokio::test]
    async fn test_clients_share_keyspace() {
        let keyspace = Keyspace::shared();
        LocalSet::new()
            .run_until(async {
                let addr = start(keyspace.clone(), save_channel().0).await;

                let mut writer = TcpStream::connect(addr).await.unwrap();
                writer
                    .write_all(b"*3\r\n$3\r\nSET\r\n$4\r\nname\r\n$6\r\nreplay\r\n")
                    .await
                    .unwrap();
                assert_eq!(read_exact_len(&mut writer, 5).await, b"+OK\r\n");

                let mut reader = TcpStream::connect(addr).await.unwrap();
                reader
                    .write_all(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n")
                    .await
                    .unwrap();
                assert_eq!(read_exact_len(&mut reader, 12).await, b"$6\r\nreplay\r\n");
            })
            .await;

        assert!(keyspace.borrow().contains(b"name"));
    }

    #[tokio::test]
    async fn test_quit_closes_socket() {
        LocalSet::new()
            .run_until(async {
                let addr = start(Keyspace::shared(), save_channel().0).await;
                let mut client = TcpStream::connect(addr).await.unwrap();

                client.write_all(b"*1\r\n$4\r\nQUIT\r\n").await.unwrap();
                let mut buf = [0u8; 16];
                let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
                    .await
                    .unwrap()
                    .unwrap();
                assert_eq!(n, 0);
            })
            .await;
    }

    #[tokio::test]
    async fn test_save_command_fires_trigger() {
        let (trigger, mut requests) = save_channel();
        LocalSet::new()
            .run_until(async {
                let addr = start(Keyspace::shared(), trigger).await;
                let mut client = TcpStream::connect(addr).await.unwrap();

                client.write_all(b"*1\r\n$4\r\nSAVE\r\n").await.unwrap();
                assert_eq!(read_exact_len(&mut client, 5).await, b"+OK\r\n");

                tokio::time::timeout(Duration::from_secs(1), requests.next())
                    .await
                    .unwrap();
            })
            .await;
    }
}
