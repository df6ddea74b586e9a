#![deny(unsafe_code)]

//! fwtabled: firewall table daemon.
//!
//! Parses flags and the optional config file, detaches if asked, and only
//! then builds the (single-threaded) Tokio runtime: `fork()` must run while
//! the process still has exactly one thread.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fwtabled_config::{AppConfig, Transport};
use fwtabled_core::Daemon;
use fwtabled_core::adapter::select_backend;
use fwtabled_core::daemon::watch_signals;

/// Receives add/delete/flush records and applies them to firewall tables.
#[derive(Parser, Debug)]
#[command(name = "fwtabled", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "fwtabled.toml")]
    config: PathBuf,

    /// Listen on host[:port] or a Unix socket path. Repeatable.
    #[arg(short = 'b', long = "bind", value_name = "TARGET")]
    binds: Vec<String>,

    /// Detach from the terminal and run in the background.
    #[arg(short, long)]
    daemonize: bool,

    /// Use stream sockets (TCP / Unix stream).
    #[arg(short = 't', long, conflicts_with = "datagram")]
    stream: bool,

    /// Use datagram sockets (UDP / Unix datagram). The default.
    #[arg(short = 'u', long)]
    datagram: bool,

    /// Remove entries after SECONDS; without TABLE, for every table. Repeatable.
    #[arg(short = 'e', long = "expire", value_name = "[TABLE]:SECONDS")]
    expire: Vec<String>,

    /// Log verbosity, 1 (errors only) to 6 (trace).
    #[arg(short, long, value_name = "LEVEL", value_parser = clap::value_parser!(u8).range(1..=6))]
    verbose: Option<u8>,

    /// Table backend.
    #[arg(long, value_parser = ["ipfw", "memory"])]
    backend: Option<String>,

    /// Validate the configuration, print it, and exit.
    #[arg(long)]
    check_config: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    if cli.check_config {
        let toml_str =
            toml::to_string_pretty(&config).map_err(|e| anyhow::anyhow!("TOML error: {e}"))?;
        println!("{toml_str}");
        return Ok(());
    }

    if config.daemon.daemonize {
        daemonize().inspect_err(|e| eprintln!("fwtabled: cannot daemonize: {e:#}"))?;
    }

    init_tracing(&config.logging.level);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create Tokio runtime")?;
    runtime
        .block_on(serve(config))
        .inspect_err(|e| error!(error = %format!("{e:#}"), "fwtabled exiting"))
}

async fn serve(config: AppConfig) -> Result<()> {
    let adapter = select_backend(&config.tables);
    let mut daemon = Daemon::bind(&config, adapter)
        .await
        .context("startup failed")?;

    let shutdown = daemon.shutdown_handle();
    let signals = tokio::spawn(async move {
        if let Err(e) = watch_signals(shutdown).await {
            error!(error = %e, "Cannot install signal handlers");
        }
    });

    let result = daemon.run().await;
    signals.abort();
    result.context("event loop failed")?;

    info!("fwtabled exiting");
    Ok(())
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = read_config_file(&cli.config)?;
    apply_overrides(cli, &mut config);
    config
        .validate()
        .with_context(|| format!("invalid configuration ({})", cli.config.display()))?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        AppConfig::load(path)
            .with_context(|| format!("cannot load {}", path.display()))
    } else {
        Ok(AppConfig::default())
    }
}

/// Command-line flags replace file values.
fn apply_overrides(cli: &Cli, config: &mut AppConfig) {
    if !cli.binds.is_empty() {
        config.daemon.binds = cli.binds.clone();
    }
    if cli.stream {
        config.daemon.transport = Transport::Stream;
    } else if cli.datagram {
        config.daemon.transport = Transport::Datagram;
    }
    if cli.daemonize {
        config.daemon.daemonize = true;
    }
    if !cli.expire.is_empty() {
        config.expiry.rules = cli.expire.clone();
    }
    if let Some(level) = cli.verbose {
        config.logging.level = verbosity_filter(level).to_string();
    }
    if let Some(backend) = &cli.backend {
        config.tables.backend = backend.clone();
    }
}

fn verbosity_filter(level: u8) -> &'static str {
    match level {
        0 | 1 => "error",
        2 => "warn",
        3 | 4 => "info",
        5 => "debug",
        _ => "trace",
    }
}

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();
}

/// Double fork, new session, chdir to `/`. Runs before any thread exists.
#[allow(unsafe_code)] // fork() requires unsafe
fn daemonize() -> Result<()> {
    use nix::unistd::{ForkResult, fork, setsid};

    // SAFETY: no runtime or other thread has been started yet.
    match unsafe { fork() }.context("first fork failed")? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    setsid().context("setsid failed")?;

    // SAFETY: still single-threaded; this is the first fork's child.
    match unsafe { fork() }.context("second fork failed")? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    std::env::set_current_dir("/").context("chdir / failed")?;
    Ok(())
}
