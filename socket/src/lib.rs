//! Outgoing socket connections as opaque stream handles.
//!
//! The contract is deliberately small: a connect call yields a handle with
//! a readable stream of incoming bytes, a writable stream of outgoing
//! bytes, a kind tag, and `close()`. No retry or backoff: a socket is a
//! single-use connection. `nc`-style consumers pump the two streams and
//! stay transport-agnostic.

#![deny(clippy::print_stdout, clippy::print_stderr)]

use bytes::Bytes;
use coral_streams::ReadableStream;
use coral_streams::WritableStream;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::debug;

pub type Result<T> = std::result::Result<T, SocketError>;

const READ_CHUNK_SIZE: usize = 8 * 1024;
const DATAGRAM_MAX: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum SocketError {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    /// Connection-oriented byte stream (TCP).
    Stream,
    /// Message-oriented (UDP); each writable chunk is one datagram.
    Datagram,
}

/// A live connection. Dropping the handle without `close()` leaves the
/// pump tasks to wind down when either side hangs up.
pub struct SocketHandle {
    kind: SocketKind,
    peer: String,
    incoming: ReadableStream,
    outgoing: WritableStream,
    pumps: Vec<JoinHandle<()>>,
}

impl SocketHandle {
    pub fn kind(&self) -> SocketKind {
        self.kind
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Bytes arriving from the peer. Ends when the peer closes.
    pub fn incoming(&self) -> ReadableStream {
        self.incoming.clone()
    }

    /// Bytes to send to the peer.
    pub fn outgoing(&self) -> WritableStream {
        self.outgoing.clone()
    }

    /// Tears the connection down: both pumps stop and the incoming stream
    /// observes end-of-stream.
    pub fn close(&self) {
        self.incoming.cancel();
        for pump in &self.pumps {
            pump.abort();
        }
        debug!("socket to {} closed", self.peer);
    }
}

/// Factory for outgoing connections.
#[derive(Clone, Default)]
pub struct SocketService;

impl SocketService {
    pub fn new() -> Self {
        Self
    }

    /// Opens a TCP connection and bridges it onto stream handles.
    pub async fn connect_stream(&self, addr: &str) -> Result<SocketHandle> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| SocketError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        let (mut read_half, mut write_half) = stream.into_split();

        let (incoming_tx, incoming) = coral_streams::pipe();
        let (outgoing, outgoing_rx) = coral_streams::pipe();

        let reader_pump = tokio::spawn(async move {
            let Ok(mut writer) = incoming_tx.lock() else {
                return;
            };
            let mut buf = [0u8; READ_CHUNK_SIZE];
            loop {
                match read_half.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if writer.write(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                            break;
                        }
                    }
                }
            }
            writer.close();
        });

        let writer_pump = tokio::spawn(async move {
            let Ok(mut reader) = outgoing_rx.lock() else {
                return;
            };
            while let Some(chunk) = reader.read().await {
                if write_half.write_all(&chunk).await.is_err() {
                    reader.cancel();
                    break;
                }
            }
            let _ = write_half.shutdown().await;
        });

        Ok(SocketHandle {
            kind: SocketKind::Stream,
            peer: addr.to_string(),
            incoming,
            outgoing,
            pumps: vec![reader_pump, writer_pump],
        })
    }

    /// Binds an ephemeral UDP socket connected to `addr`; each outgoing
    /// chunk is sent as one datagram, each received datagram arrives as one
    /// chunk.
    pub async fn connect_datagram(&self, addr: &str) -> Result<SocketHandle> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket
            .connect(addr)
            .await
            .map_err(|source| SocketError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        let socket = std::sync::Arc::new(socket);

        let (incoming_tx, incoming) = coral_streams::pipe();
        let (outgoing, outgoing_rx) = coral_streams::pipe();

        let recv_socket = std::sync::Arc::clone(&socket);
        let reader_pump = tokio::spawn(async move {
            let Ok(mut writer) = incoming_tx.lock() else {
                return;
            };
            let mut buf = vec![0u8; DATAGRAM_MAX];
            loop {
                match recv_socket.recv(&mut buf).await {
                    Ok(n) => {
                        if writer.write(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
            writer.close();
        });

        let writer_pump = tokio::spawn(async move {
            let Ok(mut reader) = outgoing_rx.lock() else {
                return;
            };
            while let Some(chunk) = reader.read().await {
                if socket.send(&chunk).await.is_err() {
                    reader.cancel();
                    break;
                }
            }
        });

        Ok(SocketHandle {
            kind: SocketKind::Datagram,
            peer: addr.to_string(),
            incoming,
            outgoing,
            pumps: vec![reader_pump, writer_pump],
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::io::AsyncReadExt;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn tcp_echo_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();

        let echo = tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.expect("accept");
            let mut buf = [0u8; 64];
            let n = conn.read(&mut buf).await.expect("read");
            conn.write_all(&buf[..n]).await.expect("write");
        });

        let service = SocketService::new();
        let handle = service.connect_stream(&addr).await.expect("connect");
        assert_eq!(handle.kind(), SocketKind::Stream);

        {
            let outgoing = handle.outgoing();
            let mut writer = outgoing.lock().expect("lock");
            writer.write_str("ping").await.expect("send");
        }

        let incoming = handle.incoming();
        let mut reader = incoming.lock().expect("lock");
        let chunk = reader.read().await.expect("chunk");
        assert_eq!(&chunk[..], b"ping");

        handle.close();
        echo.await.expect("echo task");
    }

    #[tokio::test]
    async fn connect_to_dead_port_fails() {
        // Bind-then-drop guarantees nothing listens on the port.
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();
        drop(listener);

        let service = SocketService::new();
        assert!(matches!(
            service.connect_stream(&addr).await,
            Err(SocketError::Connect { .. })
        ));
    }

    #[tokio::test]
    async fn close_ends_the_incoming_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();
        let keep_open = tokio::spawn(async move {
            let (conn, _) = listener.accept().await.expect("accept");
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            drop(conn);
        });

        let service = SocketService::new();
        let handle = service.connect_stream(&addr).await.expect("connect");
        let incoming = handle.incoming();
        handle.close();

        let mut reader = incoming.lock().expect("lock");
        assert_eq!(reader.read().await, None);
        keep_open.abort();
    }
}
