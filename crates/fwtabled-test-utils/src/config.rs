//! Configuration builders for tests.
//!
//! [`TestConfigBuilder`] starts from a config that is safe to run anywhere:
//! in-memory tables, one UDP socket on an ephemeral loopback port, and
//! short cleanup intervals.

use fwtabled_config::{AppConfig, Transport};

/// Fluent builder for [`AppConfig`] in tests.
///
/// # Example
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .stream()
///     .expire("0:5")
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
    custom_binds: bool,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let mut config = AppConfig::default();
        config.daemon.binds = vec!["127.0.0.1:0".to_string()];
        config.tables.backend = "memory".to_string();
        config.expiry.min_interval_ms = 20;
        config.expiry.max_delay_ms = 200;
        Self {
            config,
            custom_binds: false,
        }
    }

    /// Add a bind target. The first call replaces the loopback default.
    pub fn bind(mut self, target: &str) -> Self {
        if !self.custom_binds {
            self.config.daemon.binds.clear();
            self.custom_binds = true;
        }
        self.config.daemon.binds.push(target.to_string());
        self
    }

    pub fn transport(mut self, transport: Transport) -> Self {
        self.config.daemon.transport = transport;
        self
    }

    pub fn stream(self) -> Self {
        self.transport(Transport::Stream)
    }

    /// Add an expiry rule in `[table]:seconds` form.
    pub fn expire(mut self, rule: &str) -> Self {
        self.config.expiry.rules.push(rule.to_string());
        self
    }

    pub fn cleanup_interval_ms(mut self, min: u64, max: u64) -> Self {
        self.config.expiry.min_interval_ms = min;
        self.config.expiry.max_delay_ms = max;
        self
    }

    pub fn default_port(mut self, port: u16) -> Self {
        self.config.daemon.default_port = port;
        self
    }

    pub fn max_connections(mut self, n: usize) -> Self {
        self.config.daemon.max_connections = n;
        self
    }

    pub fn fallback_max_tables(mut self, n: u32) -> Self {
        self.config.tables.fallback_max_tables = n;
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    /// Build without validation.
    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
