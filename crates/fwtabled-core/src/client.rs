//! Client: sends one command record to a running daemon.
//!
//! Used by `fwtablectl` and the integration tests. The daemon never
//! answers, so a successful send only means the record left this process.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket, UnixDatagram, UnixStream};
use tracing::debug;

use fwtabled_config::{BindTarget, Transport};

use crate::protocol::Message;

/// Errors from the client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("cannot resolve {target}: {source}")]
    Resolve { target: String, source: io::Error },

    #[error("{0} resolved to no addresses")]
    NoAddress(String),

    #[error("failed to reach daemon at {target}: {source}")]
    Connect { target: String, source: io::Error },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Sends records to one daemon endpoint.
#[derive(Debug, Clone)]
pub struct Client {
    target: BindTarget,
    transport: Transport,
    default_port: u16,
}

impl Client {
    /// `default_port` applies when an INET target has no port.
    pub fn new(target: BindTarget, transport: Transport, default_port: u16) -> Self {
        Self {
            target,
            transport,
            default_port,
        }
    }

    /// Send an encoded message.
    pub async fn send(&self, msg: &Message) -> Result<(), ClientError> {
        debug!(target = %self.target, command = %msg.command, table = msg.table, "Sending");
        self.send_raw(&msg.encode()).await
    }

    /// Send `record` as-is, in one datagram or on one fresh connection.
    pub async fn send_raw(&self, record: &[u8]) -> Result<(), ClientError> {
        match &self.target {
            BindTarget::Unix(path) => {
                let connect = |source| ClientError::Connect {
                    target: path.display().to_string(),
                    source,
                };
                match self.transport {
                    Transport::Stream => {
                        let mut stream = UnixStream::connect(path).await.map_err(connect)?;
                        stream.write_all(record).await?;
                        stream.shutdown().await?;
                    }
                    Transport::Datagram => {
                        let sock = UnixDatagram::unbound()?;
                        sock.send_to(record, path).await.map_err(connect)?;
                    }
                }
                Ok(())
            }
            BindTarget::Inet { .. } => {
                let mut last_err = None;
                for addr in self.resolve().await? {
                    match self.send_inet(addr, record).await {
                        Ok(()) => return Ok(()),
                        Err(e) => {
                            debug!(%addr, error = %e, "Send failed, trying next address");
                            last_err = Some(e);
                        }
                    }
                }
                Err(ClientError::Connect {
                    target: self.target.to_string(),
                    source: last_err.unwrap_or_else(|| io::ErrorKind::NotFound.into()),
                })
            }
        }
    }

    async fn resolve(&self) -> Result<Vec<SocketAddr>, ClientError> {
        let BindTarget::Inet { host, port } = &self.target else {
            return Ok(Vec::new());
        };
        let port = port.unwrap_or(self.default_port);
        let addrs = tokio::net::lookup_host((host.as_str(), port))
            .await
            .map_err(|source| ClientError::Resolve {
                target: self.target.to_string(),
                source,
            })?
            .collect::<Vec<_>>();
        if addrs.is_empty() {
            return Err(ClientError::NoAddress(self.target.to_string()));
        }
        Ok(addrs)
    }

    async fn send_inet(&self, addr: SocketAddr, record: &[u8]) -> io::Result<()> {
        match self.transport {
            Transport::Stream => {
                let mut stream = TcpStream::connect(addr).await?;
                stream.write_all(record).await?;
                stream.shutdown().await
            }
            Transport::Datagram => {
                let local = if addr.is_ipv6() {
                    SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
                } else {
                    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
                };
                let sock = UdpSocket::bind(local).await?;
                sock.send_to(record, addr).await.map(|_| ())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_send_udp_datagram() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();
        let client = Client::new(
            "127.0.0.1".parse().unwrap(),
            Transport::Datagram,
            port,
        );

        let msg = Message::add(1, Ipv4Addr::new(192, 0, 2, 1), 32);
        client.send(&msg).await.unwrap();

        let mut buf = [0u8; 16];
        let (n, _) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &msg.encode());
    }

    #[tokio::test]
    async fn test_send_unix_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctl.sock");
        let listener = tokio::net::UnixListener::bind(&path).unwrap();
        let client = Client::new(BindTarget::Unix(path), Transport::Stream, 0);

        let send = tokio::spawn(async move { client.send(&Message::flush(3)).await });
        let (mut conn, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut conn, &mut received)
            .await
            .unwrap();
        send.await.unwrap().unwrap();
        assert_eq!(received, Message::flush(3).encode());
    }

    #[tokio::test]
    async fn test_connect_refused_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let client = Client::new(
            BindTarget::Unix(dir.path().join("absent.sock")),
            Transport::Stream,
            0,
        );
        let err = client.send_raw(&[0; 7]).await.unwrap_err();
        assert!(matches!(err, ClientError::Connect { .. }));
    }
}
