#![deny(unsafe_code)]

//! Configuration loading and validation for fwtabled.
//!
//! Loads an optional TOML file into [`AppConfig`], which the command-line
//! flags then override. The validated value is built once at startup and
//! handed by reference to the listener manager, dispatcher, and expiry
//! queue; nothing mutates it afterwards.

/// Bind-target parsing and transport selection.
pub mod bind;
/// Per-table expiry policy.
pub mod policy;

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

pub use bind::{BindTarget, Transport};
pub use policy::{ExpiryPolicy, ExpiryRule};

/// Port used when a bind target names no port, and for the fallback bind.
pub const DEFAULT_PORT: u16 = 12345;

/// Table count assumed when the firewall cannot be asked for its own.
pub const DEFAULT_FALLBACK_MAX_TABLES: u32 = 128;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Listener and event-loop configuration.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Automatic expiry of table entries.
    #[serde(default)]
    pub expiry: ExpiryConfig,

    /// Firewall table backend.
    #[serde(default)]
    pub tables: TablesConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration for listeners and the event loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Bind targets: `host[:port]` or a filesystem path.
    #[serde(default)]
    pub binds: Vec<String>,

    /// Stream or datagram sockets for every target.
    #[serde(default)]
    pub transport: Transport,

    /// Detach from the terminal before serving.
    #[serde(default)]
    pub daemonize: bool,

    /// Port used for targets without one.
    #[serde(default = "default_port")]
    pub default_port: u16,

    /// Listen backlog for stream sockets.
    #[serde(default = "default_backlog")]
    pub backlog: u32,

    /// Maximum number of sockets monitored at once (servers included).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            binds: Vec::new(),
            transport: Transport::default(),
            daemonize: false,
            default_port: default_port(),
            backlog: default_backlog(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_backlog() -> u32 {
    5
}

fn default_max_connections() -> usize {
    1024
}

/// Automatic expiry configuration.
///
/// ## TOML Example
///
/// ```toml
/// [expiry]
/// rules = [":3600", "2:300"]
/// min_interval_ms = 1000
/// max_delay_ms = 5000
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpiryConfig {
    /// Rules in `[table]:seconds` form.
    #[serde(default)]
    pub rules: Vec<String>,

    /// Shortest wait between two cleanup passes, in milliseconds.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,

    /// Longest a due entry may wait for cleanup under constant socket
    /// activity, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            min_interval_ms: default_min_interval_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_min_interval_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    5000
}

/// Firewall table backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TablesConfig {
    /// Backend: "ipfw" or "memory".
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Path to the ipfw utility.
    #[serde(default = "default_ipfw_path")]
    pub ipfw_path: String,

    /// Table count used when the backend cannot report one (0 = none,
    /// which makes a failed query fatal).
    #[serde(default = "default_fallback_max_tables")]
    pub fallback_max_tables: u32,

    /// Table count reported by the memory backend.
    #[serde(default = "default_fallback_max_tables")]
    pub memory_max_tables: u32,
}

impl Default for TablesConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            ipfw_path: default_ipfw_path(),
            fallback_max_tables: default_fallback_max_tables(),
            memory_max_tables: default_fallback_max_tables(),
        }
    }
}

fn default_backend() -> String {
    "ipfw".to_string()
}

fn default_ipfw_path() -> String {
    "/sbin/ipfw".to_string()
}

fn default_fallback_max_tables() -> u32 {
    DEFAULT_FALLBACK_MAX_TABLES
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file. Blocking; the daemon reads its
    /// file before any runtime exists.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), "Loaded configuration file");
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.daemon.default_port == 0 {
            return Err(ConfigError::Validation(
                "daemon.default_port must be non-zero".to_string(),
            ));
        }
        if self.daemon.backlog == 0 {
            return Err(ConfigError::Validation(
                "daemon.backlog must be at least 1".to_string(),
            ));
        }
        if self.daemon.max_connections == 0 {
            return Err(ConfigError::Validation(
                "daemon.max_connections must be at least 1".to_string(),
            ));
        }
        self.bind_targets()?;

        self.expiry_policy()?;
        if self.expiry.min_interval_ms > self.expiry.max_delay_ms {
            return Err(ConfigError::Validation(format!(
                "expiry.min_interval_ms ({}) must not exceed expiry.max_delay_ms ({})",
                self.expiry.min_interval_ms, self.expiry.max_delay_ms
            )));
        }

        let valid_backends = ["ipfw", "memory"];
        if !valid_backends.contains(&self.tables.backend.as_str()) {
            return Err(ConfigError::Validation(format!(
                "tables.backend must be one of {:?}, got {:?}",
                valid_backends, self.tables.backend
            )));
        }
        if self.tables.backend == "ipfw" && self.tables.ipfw_path.is_empty() {
            return Err(ConfigError::Validation(
                "tables.ipfw_path must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Parsed bind targets, in configuration order.
    pub fn bind_targets(&self) -> Result<Vec<BindTarget>, ConfigError> {
        self.daemon.binds.iter().map(|b| b.parse()).collect()
    }

    /// Expiry policy built from the configured rules.
    pub fn expiry_policy(&self) -> Result<ExpiryPolicy, ConfigError> {
        let rules = self
            .expiry
            .rules
            .iter()
            .map(|r| r.parse())
            .collect::<Result<Vec<ExpiryRule>, _>>()?;
        Ok(ExpiryPolicy::from_rules(&rules))
    }

    /// Lower bound on the wait between cleanup passes.
    pub fn min_cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.expiry.min_interval_ms)
    }

    /// Cleanup watchdog threshold.
    pub fn max_cleanup_delay(&self) -> Duration {
        Duration::from_millis(self.expiry.max_delay_ms)
    }

    /// Table count to assume when the backend query fails, if any.
    pub fn fallback_max_tables(&self) -> Option<u32> {
        Some(self.tables.fallback_max_tables).filter(|n| *n > 0)
    }
}
