//! Daemon test harness.
//!
//! [`TestDaemon`] binds a daemon on a [`RecordingTables`] backend and runs
//! its event loop in a background task. [`TestDaemon::stop`] shuts the loop
//! down and hands the daemon back for inspection.

use std::net::SocketAddr;
use std::time::Duration;

use fwtabled_config::{AppConfig, BindTarget, Transport};
use fwtabled_core::{Client, Daemon, DaemonError, ListenAddr, ShutdownSignal};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::tables::RecordingTables;

type RunResult = (Daemon<RecordingTables>, Result<(), DaemonError>);

/// A daemon running in a background task.
pub struct TestDaemon {
    pub tables: RecordingTables,
    addrs: Vec<ListenAddr>,
    transport: Transport,
    shutdown: broadcast::Sender<ShutdownSignal>,
    task: JoinHandle<RunResult>,
}

impl TestDaemon {
    /// Bind and start a daemon, panicking on startup failure.
    pub async fn start(config: AppConfig, tables: RecordingTables) -> Self {
        Self::try_start(config, tables)
            .await
            .expect("failed to start test daemon")
    }

    /// Bind and start a daemon.
    pub async fn try_start(config: AppConfig, tables: RecordingTables) -> Result<Self, DaemonError> {
        let mut daemon = Daemon::bind(&config, tables.clone()).await?;
        let addrs = daemon.local_addrs();
        let shutdown = daemon.shutdown_handle();
        let task = tokio::spawn(async move {
            let result = daemon.run().await;
            (daemon, result)
        });

        Ok(Self {
            tables,
            addrs,
            transport: config.daemon.transport,
            shutdown,
            task,
        })
    }

    pub fn addrs(&self) -> &[ListenAddr] {
        &self.addrs
    }

    /// First bound INET address.
    pub fn inet_addr(&self) -> SocketAddr {
        self.addrs
            .iter()
            .find_map(ListenAddr::inet)
            .expect("daemon has no INET socket")
    }

    /// Client for the first bound socket, using the daemon's transport.
    pub fn client(&self) -> Client {
        let target = match self.addrs.first().expect("daemon has no sockets") {
            ListenAddr::Inet(addr) => BindTarget::Inet {
                host: addr.ip().to_string(),
                port: Some(addr.port()),
            },
            ListenAddr::Unix(path) => BindTarget::Unix(path.clone()),
        };
        Client::new(target, self.transport, 0)
    }

    /// Whether the event loop has exited on its own.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the loop and return the daemon. Panics if the loop failed.
    pub async fn stop(self) -> Daemon<RecordingTables> {
        let _ = self.shutdown.send(ShutdownSignal);
        let (daemon, result) = self.task.await.expect("daemon task panicked");
        result.expect("event loop failed");
        daemon
    }
}

/// Poll `check` every 10ms until it holds or `timeout` passes.
pub async fn eventually<F: FnMut() -> bool>(timeout: Duration, mut check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
