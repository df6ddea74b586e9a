//! Core daemon process: startup, shutdown, and main event loop.
//!
//! The loop is single-threaded. Each iteration waits for readiness on the
//! server sockets and every accepted connection, bounded by the expiry
//! queue's next deadline. A wakeup with no ready socket, or one where the
//! cleanup watchdog has tripped, runs an expiry pass first; then every
//! ready socket gets exactly one read. A datagram read uses a buffer one
//! byte larger than a record so oversize datagrams are caught; a stream read
//! asks for exactly one record and anything the peer sent after it is
//! discarded. Stream connections are closed after that read, whatever it
//! returned (except `WouldBlock`).

use std::future::poll_fn;
use std::io;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use fwtabled_config::{AppConfig, ConfigError};

use crate::adapter::{AdapterError, TableAdapter, resolve_max_tables};
use crate::build_info;
use crate::connections::{ConnectionId, ConnectionSlots};
use crate::dispatch::Dispatcher;
use crate::expiry::ExpiryQueue;
use crate::listener::{
    Connection, ListenAddr, ListenerError, ListenerManager, Peer, Server, ServerReady,
};
use crate::protocol::{MESSAGE_LEN, Message};

/// Shutdown signal sent via broadcast channel.
#[derive(Debug, Clone)]
pub struct ShutdownSignal;

/// Errors from the daemon runtime.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("cannot determine the number of tables: {0}")]
    MaxTables(#[source] AdapterError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("listener error: {0}")]
    Listener(#[from] ListenerError),

    #[error("readiness wait failed: {0}")]
    Wait(#[source] io::Error),
}

#[derive(Debug)]
struct Accepted {
    conn: Connection,
    peer: Peer,
}

#[derive(Debug)]
enum Event {
    Accepted(Connection, Peer),
    Datagram(usize),
    ServerError(usize, io::Error),
    Readable(ConnectionId),
}

/// The fwtabled daemon: bound sockets plus the table state they drive.
pub struct Daemon<A> {
    servers: Vec<Server>,
    connections: ConnectionSlots<Accepted>,
    dispatcher: Dispatcher<A>,
    expiry: ExpiryQueue,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
    shutdown_rx: broadcast::Receiver<ShutdownSignal>,
}

impl<A: TableAdapter> Daemon<A> {
    /// Query the table count, build the expiry queue, and bind every
    /// configured target.
    pub async fn bind(config: &AppConfig, mut adapter: A) -> Result<Self, DaemonError> {
        let max_tables = resolve_max_tables(&mut adapter, config.fallback_max_tables())
            .map_err(DaemonError::MaxTables)?;
        let expiry = ExpiryQueue::from_config(config)?;
        let servers = ListenerManager::new(config)?.bind_all().await?;

        let capacity = config
            .daemon
            .max_connections
            .saturating_sub(servers.len());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        info!(
            version = %build_info::version_string(),
            backend = adapter.name(),
            max_tables,
            servers = servers.len(),
            connection_slots = capacity,
            expiry = expiry.is_active(),
            "fwtabled initialised"
        );

        Ok(Self {
            servers,
            connections: ConnectionSlots::new(capacity),
            dispatcher: Dispatcher::new(adapter, max_tables),
            expiry,
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Run the event loop until shutdown is requested or the readiness wait
    /// fails.
    pub async fn run(&mut self) -> Result<(), DaemonError> {
        info!("Event loop starting");
        let mut buf = [0u8; MESSAGE_LEN + 1];

        loop {
            let timeout = self.expiry.next_timeout(Instant::now());
            let events = tokio::select! {
                biased;
                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping event loop");
                    break;
                }
                ready = wait_ready(&self.servers, &self.connections, timeout) => {
                    ready.map_err(DaemonError::Wait)?
                }
            };

            let now = Instant::now();
            if events.is_empty() || self.expiry.cleanup_overdue(now) {
                self.expiry.cleanup(self.dispatcher.adapter_mut(), now);
            }

            for event in events {
                self.service(event, &mut buf)?;
            }
        }

        info!("Daemon stopped");
        Ok(())
    }

    fn service(&mut self, event: Event, buf: &mut [u8]) -> Result<(), DaemonError> {
        match event {
            Event::Accepted(conn, peer) => match self.connections.insert(Accepted { conn, peer }) {
                Ok(id) => debug!(slot = id.index(), "Connection accepted"),
                Err(rejected) => {
                    warn!(
                        peer = %rejected.peer,
                        capacity = self.connections.capacity(),
                        "No free connection slot, closing connection"
                    );
                }
            },
            Event::ServerError(index, error) => {
                let server = &self.servers[index];
                if server.kind().is_stream() {
                    warn!(addr = %server.local_addr(), error = %error, "Accept failed");
                } else {
                    return Err(DaemonError::Wait(error));
                }
            }
            Event::Datagram(index) => match self.servers[index].try_recv(buf) {
                Ok((n, peer)) => self.handle_record(&buf[..n], &peer),
                Err(e) if is_transient(&e) => {}
                Err(e) => {
                    warn!(addr = %self.servers[index].local_addr(), error = %e, "Receive failed")
                }
            },
            Event::Readable(id) => {
                let Some(accepted) = self.connections.get(id) else {
                    return Ok(());
                };
                let result = accepted.conn.try_read(&mut buf[..MESSAGE_LEN]);
                let peer = accepted.peer.clone();
                match result {
                    Err(e) if is_transient(&e) => return Ok(()),
                    Err(e) => warn!(peer = %peer, error = %e, "Read failed"),
                    Ok(0) => debug!(peer = %peer, "Peer closed before sending a record"),
                    Ok(n) => self.handle_record(&buf[..n], &peer),
                }
                self.connections.remove(id);
                trace!(slot = id.index(), "Connection closed");
            }
        }
        Ok(())
    }

    fn handle_record(&mut self, record: &[u8], peer: &Peer) {
        if record.len() != MESSAGE_LEN {
            trace!(peer = %peer, len = record.len(), "Dropping record of unexpected length");
            return;
        }
        match Message::decode(record, self.dispatcher.max_tables()) {
            Ok(msg) => {
                let outcome = self.dispatcher.dispatch(&msg, &mut self.expiry, Instant::now());
                debug!(peer = %peer, command = %msg.command, ?outcome, "Record handled");
            }
            Err(e) => warn!(peer = %peer, error = %e, "Dropping invalid record"),
        }
    }

    /// Addresses of the bound server sockets.
    pub fn local_addrs(&self) -> Vec<ListenAddr> {
        self.servers.iter().map(|s| s.local_addr().clone()).collect()
    }

    /// Number of accepted connections awaiting their record.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn expiry(&self) -> &ExpiryQueue {
        &self.expiry
    }

    pub fn adapter(&self) -> &A {
        self.dispatcher.adapter()
    }

    pub fn max_tables(&self) -> u32 {
        self.dispatcher.max_tables()
    }

    /// Sender that stops the event loop when signalled.
    pub fn shutdown_handle(&self) -> broadcast::Sender<ShutdownSignal> {
        self.shutdown_tx.clone()
    }

    /// Request a graceful shutdown of the daemon.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(ShutdownSignal);
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

fn poll_events(
    servers: &[Server],
    connections: &ConnectionSlots<Accepted>,
    cx: &mut Context<'_>,
) -> Poll<Vec<Event>> {
    let mut events = Vec::new();

    for (index, server) in servers.iter().enumerate() {
        match server.poll_ready(cx) {
            Poll::Ready(Ok(ServerReady::Accepted(conn, peer))) => {
                events.push(Event::Accepted(conn, peer))
            }
            Poll::Ready(Ok(ServerReady::Readable)) => events.push(Event::Datagram(index)),
            Poll::Ready(Err(e)) if is_transient(&e) => {}
            Poll::Ready(Err(e)) => events.push(Event::ServerError(index, e)),
            Poll::Pending => {}
        }
    }

    // A readiness error is surfaced by the read that follows.
    for (id, accepted) in connections.iter() {
        if accepted.conn.poll_read_ready(cx).is_ready() {
            events.push(Event::Readable(id));
        }
    }

    if events.is_empty() {
        Poll::Pending
    } else {
        Poll::Ready(events)
    }
}

/// Wait until at least one socket is ready or `timeout` passes. A timeout
/// yields no events.
async fn wait_ready(
    servers: &[Server],
    connections: &ConnectionSlots<Accepted>,
    timeout: Option<Duration>,
) -> io::Result<Vec<Event>> {
    let ready = poll_fn(|cx| poll_events(servers, connections, cx));
    match timeout {
        Some(limit) => Ok(tokio::time::timeout(limit, ready)
            .await
            .unwrap_or_default()),
        None => Ok(ready.await),
    }
}

/// Log process signals. Hangup is only logged; interrupt and terminate
/// stop the event loop through `shutdown`.
#[cfg(unix)]
pub async fn watch_signals(shutdown: broadcast::Sender<ShutdownSignal>) -> io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    loop {
        tokio::select! {
            _ = hangup.recv() => info!(signal = "SIGHUP", "Signal received, ignoring"),
            _ = interrupt.recv() => {
                warn!(signal = "SIGINT", "Signal received, initiating graceful shutdown");
                let _ = shutdown.send(ShutdownSignal);
            }
            _ = terminate.recv() => {
                warn!(signal = "SIGTERM", "Signal received, initiating graceful shutdown");
                let _ = shutdown.send(ShutdownSignal);
            }
        }
    }
}
