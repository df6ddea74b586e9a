//! Expiry policy: per-table time-to-live for table entries.
//!
//! Rules are written as `[table]:seconds`. A rule without a table index
//! applies to every table; a rule naming a table overrides it for that
//! table. A TTL of zero means entries never expire.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use crate::ConfigError;

/// A single expiry rule as given on the command line or in TOML.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryRule {
    /// Table the rule applies to, or `None` for all tables.
    pub table: Option<u8>,
    /// Lifetime in seconds (0 = never expire).
    pub seconds: u64,
}

impl ExpiryRule {
    /// Rule applying to a single table.
    pub fn table(table: u8, seconds: u64) -> Self {
        Self {
            table: Some(table),
            seconds,
        }
    }

    /// Rule applying to every table without a rule of its own.
    pub fn all(seconds: u64) -> Self {
        Self {
            table: None,
            seconds,
        }
    }
}

impl FromStr for ExpiryRule {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (table, seconds) = s.trim().split_once(':').ok_or_else(|| {
            ConfigError::Validation(format!(
                "expiry rule {s:?} must have the form [table]:seconds"
            ))
        })?;

        let table = match table.trim() {
            "" => None,
            t => Some(t.parse::<u8>().map_err(|e| {
                ConfigError::Validation(format!("invalid table {t:?} in expiry rule {s:?}: {e}"))
            })?),
        };
        let seconds = seconds.trim().parse::<u64>().map_err(|e| {
            ConfigError::Validation(format!(
                "invalid seconds {seconds:?} in expiry rule {s:?}: {e}"
            ))
        })?;

        Ok(Self { table, seconds })
    }
}

/// Resolved mapping from table id to TTL.
///
/// Built once at startup and read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpiryPolicy {
    default: Option<Duration>,
    tables: BTreeMap<u8, Duration>,
}

impl ExpiryPolicy {
    /// Policy under which nothing ever expires.
    pub fn none() -> Self {
        Self::default()
    }

    /// Build a policy from rules. Later rules replace earlier ones for the
    /// same scope.
    pub fn from_rules(rules: &[ExpiryRule]) -> Self {
        let mut policy = Self::default();
        for rule in rules {
            let ttl = Duration::from_secs(rule.seconds);
            match rule.table {
                Some(table) => {
                    policy.tables.insert(table, ttl);
                }
                None => policy.default = Some(ttl),
            }
        }
        policy
    }

    /// TTL for `table`, or `None` if its entries never expire.
    pub fn ttl(&self, table: u8) -> Option<Duration> {
        self.tables
            .get(&table)
            .copied()
            .or(self.default)
            .filter(|ttl| !ttl.is_zero())
    }

    /// Whether any table has a non-zero TTL.
    pub fn is_active(&self) -> bool {
        self.default.is_some_and(|ttl| !ttl.is_zero())
            || self.tables.values().any(|ttl| !ttl.is_zero())
    }
}
