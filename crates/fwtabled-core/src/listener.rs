//! Listener manager: turns bind targets into listening sockets.
//!
//! Path targets become Unix-domain sockets (a stale file at the path is
//! removed first). Host targets are resolved and every resulting address is
//! bound on its own, so one failing address family does not take the
//! others down. The transport preference picks stream or datagram sockets
//! for every target.
//!
//! Each socket gets a receive low-water mark of one full record. INET
//! sockets get `SO_REUSEADDR`; stream sockets listen with the configured
//! backlog. When nothing could be bound the manager falls back to a single
//! wildcard INET socket on the default port, and failure there is fatal.

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket as StdUdpSocket};
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::task::{Context, Poll};

use fwtabled_config::{AppConfig, BindTarget, ConfigError, Transport};
use nix::sys::socket::{self, AddressFamily, SockFlag, SockType, SockaddrStorage, sockopt};
use tokio::net::{
    TcpListener, TcpSocket, TcpStream, UdpSocket, UnixDatagram, UnixListener, UnixSocket,
    UnixStream,
};
use tracing::{debug, info, warn};

use crate::protocol::MESSAGE_LEN;

/// Errors from binding listeners.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("no bind target is usable and the fallback {addr} failed: {source}")]
    NoUsableTarget { addr: SocketAddr, source: io::Error },
}

/// Socket family and type of a listening socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Tcp,
    Udp,
    UnixStream,
    UnixDatagram,
}

impl TransportKind {
    pub fn is_stream(self) -> bool {
        matches!(self, TransportKind::Tcp | TransportKind::UnixStream)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportKind::Tcp => "tcp",
            TransportKind::Udp => "udp",
            TransportKind::UnixStream => "unix-stream",
            TransportKind::UnixDatagram => "unix-datagram",
        })
    }
}

/// Address a server socket is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    Inet(SocketAddr),
    Unix(PathBuf),
}

impl ListenAddr {
    /// The INET address, if this is an INET socket.
    pub fn inet(&self) -> Option<SocketAddr> {
        match self {
            ListenAddr::Inet(addr) => Some(*addr),
            ListenAddr::Unix(_) => None,
        }
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenAddr::Inet(addr) => write!(f, "{addr}"),
            ListenAddr::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Remote end of a connection or datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Peer {
    Inet(SocketAddr),
    Unix(Option<PathBuf>),
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Peer::Inet(addr) => write!(f, "{addr}"),
            Peer::Unix(Some(path)) => write!(f, "{}", path.display()),
            Peer::Unix(None) => f.write_str("unix:unnamed"),
        }
    }
}

fn unix_peer(addr: tokio::net::unix::SocketAddr) -> Peer {
    Peer::Unix(addr.as_pathname().map(Path::to_path_buf))
}

/// An accepted stream connection.
#[derive(Debug)]
pub enum Connection {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl Connection {
    pub fn poll_read_ready(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self {
            Connection::Tcp(s) => s.poll_read_ready(cx),
            Connection::Unix(s) => s.poll_read_ready(cx),
        }
    }

    /// One non-blocking read.
    pub fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Connection::Tcp(s) => s.try_read(buf),
            Connection::Unix(s) => s.try_read(buf),
        }
    }
}

/// Readiness reported by a server socket.
#[derive(Debug)]
pub enum ServerReady {
    /// A stream server accepted a connection.
    Accepted(Connection, Peer),
    /// A datagram server has a datagram queued.
    Readable,
}

#[derive(Debug)]
enum ServerSocket {
    Tcp(TcpListener),
    Udp(UdpSocket),
    UnixStream(UnixListener),
    UnixDatagram(UnixDatagram),
}

/// A bound, listening server socket.
#[derive(Debug)]
pub struct Server {
    socket: ServerSocket,
    local: ListenAddr,
}

impl Server {
    pub fn kind(&self) -> TransportKind {
        match self.socket {
            ServerSocket::Tcp(_) => TransportKind::Tcp,
            ServerSocket::Udp(_) => TransportKind::Udp,
            ServerSocket::UnixStream(_) => TransportKind::UnixStream,
            ServerSocket::UnixDatagram(_) => TransportKind::UnixDatagram,
        }
    }

    pub fn local_addr(&self) -> &ListenAddr {
        &self.local
    }

    /// Poll for a new connection (stream) or a queued datagram.
    pub fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<io::Result<ServerReady>> {
        match &self.socket {
            ServerSocket::Tcp(l) => l
                .poll_accept(cx)
                .map_ok(|(s, peer)| ServerReady::Accepted(Connection::Tcp(s), Peer::Inet(peer))),
            ServerSocket::UnixStream(l) => l
                .poll_accept(cx)
                .map_ok(|(s, peer)| ServerReady::Accepted(Connection::Unix(s), unix_peer(peer))),
            ServerSocket::Udp(s) => s.poll_recv_ready(cx).map_ok(|()| ServerReady::Readable),
            ServerSocket::UnixDatagram(s) => {
                s.poll_recv_ready(cx).map_ok(|()| ServerReady::Readable)
            }
        }
    }

    /// Receive one datagram without blocking. Stream servers always report
    /// `WouldBlock`.
    pub fn try_recv(&self, buf: &mut [u8]) -> io::Result<(usize, Peer)> {
        match &self.socket {
            ServerSocket::Udp(s) => s.try_recv_from(buf).map(|(n, peer)| (n, Peer::Inet(peer))),
            ServerSocket::UnixDatagram(s) => {
                s.try_recv_from(buf).map(|(n, peer)| (n, unix_peer(peer)))
            }
            ServerSocket::Tcp(_) | ServerSocket::UnixStream(_) => {
                Err(io::ErrorKind::WouldBlock.into())
            }
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let ListenAddr::Unix(path) = &self.local {
            if let Err(e) = std::fs::remove_file(path) {
                debug!(path = %path.display(), error = %e, "Could not remove socket file");
            }
        }
    }
}

/// Set the receive low-water mark to one full record.
#[allow(unsafe_code)] // nix has no SO_RCVLOWAT wrapper
fn set_low_water_mark<F: AsFd>(fd: &F) -> io::Result<()> {
    let value = MESSAGE_LEN as libc::c_int;
    // SAFETY: the fd stays borrowed for the call, and the pointer and length
    // describe `value`, which outlives it.
    let rc = unsafe {
        libc::setsockopt(
            fd.as_fd().as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_RCVLOWAT,
            (&value as *const libc::c_int).cast(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Binds the configured targets.
#[derive(Debug)]
pub struct ListenerManager {
    targets: Vec<BindTarget>,
    transport: Transport,
    default_port: u16,
    backlog: u32,
}

impl ListenerManager {
    pub fn new(config: &AppConfig) -> Result<Self, ListenerError> {
        Ok(Self {
            targets: config.bind_targets()?,
            transport: config.daemon.transport,
            default_port: config.daemon.default_port,
            backlog: config.daemon.backlog,
        })
    }

    /// Bind every target, falling back to the wildcard address when none
    /// succeeds.
    pub async fn bind_all(&self) -> Result<Vec<Server>, ListenerError> {
        let mut servers = Vec::new();

        for target in &self.targets {
            match target {
                BindTarget::Unix(path) => match self.bind_unix(path) {
                    Ok(server) => servers.push(server),
                    Err(e) => warn!(target = %target, error = %e, "Bind failed"),
                },
                BindTarget::Inet { host, port } => {
                    let port = port.unwrap_or(self.default_port);
                    let addrs = match tokio::net::lookup_host((host.as_str(), port)).await {
                        Ok(addrs) => addrs.collect::<Vec<_>>(),
                        Err(e) => {
                            warn!(target = %target, error = %e, "Cannot resolve bind target");
                            continue;
                        }
                    };
                    for addr in addrs {
                        match self.bind_inet(addr) {
                            Ok(server) => servers.push(server),
                            Err(e) => warn!(target = %target, %addr, error = %e, "Bind failed"),
                        }
                    }
                }
            }
        }

        if servers.is_empty() {
            let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.default_port));
            warn!(%addr, "No usable bind target, falling back to wildcard");
            let server = self
                .bind_inet(addr)
                .map_err(|source| ListenerError::NoUsableTarget { addr, source })?;
            servers.push(server);
        }

        Ok(servers)
    }

    fn bind_unix(&self, path: &Path) -> io::Result<Server> {
        match std::fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "Removed stale socket file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let socket = match self.transport {
            Transport::Stream => {
                let sock = UnixSocket::new_stream()?;
                low_water_mark_or_warn(&sock);
                sock.bind(path)?;
                ServerSocket::UnixStream(sock.listen(self.backlog)?)
            }
            Transport::Datagram => {
                let sock = UnixSocket::new_datagram()?;
                low_water_mark_or_warn(&sock);
                sock.bind(path)?;
                ServerSocket::UnixDatagram(sock.datagram()?)
            }
        };
        let server = Server {
            socket,
            local: ListenAddr::Unix(path.to_path_buf()),
        };
        info!(transport = %server.kind(), path = %path.display(), "Listening");
        Ok(server)
    }

    fn bind_inet(&self, addr: SocketAddr) -> io::Result<Server> {
        let (socket, local) = match self.transport {
            Transport::Stream => {
                let sock = if addr.is_ipv6() {
                    TcpSocket::new_v6()?
                } else {
                    TcpSocket::new_v4()?
                };
                sock.set_reuseaddr(true)?;
                if addr.is_ipv6() {
                    socket::setsockopt(&sock, sockopt::Ipv6V6Only, &true)?;
                }
                low_water_mark_or_warn(&sock);
                sock.bind(addr)?;
                let listener = sock.listen(self.backlog)?;
                let local = listener.local_addr()?;
                (ServerSocket::Tcp(listener), local)
            }
            Transport::Datagram => {
                let sock = udp_socket(addr)?;
                let local = sock.local_addr()?;
                (ServerSocket::Udp(sock), local)
            }
        };
        let server = Server {
            socket,
            local: ListenAddr::Inet(local),
        };
        info!(transport = %server.kind(), addr = %local, "Listening");
        Ok(server)
    }
}

fn low_water_mark_or_warn<F: AsFd>(fd: &F) {
    if let Err(e) = set_low_water_mark(fd) {
        warn!(error = %e, "Cannot set receive low-water mark");
    }
}

// Options must be set before bind, which std and tokio do not allow for UDP.
fn udp_socket(addr: SocketAddr) -> io::Result<UdpSocket> {
    let family = if addr.is_ipv6() {
        AddressFamily::Inet6
    } else {
        AddressFamily::Inet
    };
    let fd: OwnedFd = socket::socket(family, SockType::Datagram, SockFlag::empty(), None)?;
    socket::setsockopt(&fd, sockopt::ReuseAddr, &true)?;
    if addr.is_ipv6() {
        socket::setsockopt(&fd, sockopt::Ipv6V6Only, &true)?;
    }
    low_water_mark_or_warn(&fd);
    socket::bind(fd.as_raw_fd(), &SockaddrStorage::from(addr))?;

    let std_sock = StdUdpSocket::from(fd);
    std_sock.set_nonblocking(true)?;
    UdpSocket::from_std(std_sock)
}
