//! Firewall table adapter: the boundary to the table store.
//!
//! The daemon never touches kernel tables directly. Every mutation goes
//! through a [`TableAdapter`], whose calls are synchronous and run on the
//! event-loop thread. Only "entry already exists" is distinguished from
//! other failures, because the dispatcher reacts to it.
//!
//! ## Backends
//!
//! ```text
//! ┌──────────────┐     ┌──────────────────────────────┐
//! │  Dispatcher  │────▶│  TableAdapter                │
//! │ Expiry queue │     │  ┌────────────┐ ┌──────────┐ │
//! └──────────────┘     │  │ IpfwTables │ │ Memory   │ │
//!                      │  └────────────┘ └──────────┘ │
//!                      └──────────────────────────────┘
//! ```

mod ipfw;
mod memory;

use std::fmt;
use std::net::Ipv4Addr;

use fwtabled_config::TablesConfig;
use tracing::warn;

pub use ipfw::IpfwTables;
pub use memory::MemoryTables;

/// Errors reported by a table backend.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("entry already exists")]
    AlreadyExists,

    #[error("table operation failed: {0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One `(table, address, prefix)` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableEntry {
    pub table: u8,
    pub addr: Ipv4Addr,
    pub prefix: u8,
}

impl TableEntry {
    pub fn new(table: u8, addr: Ipv4Addr, prefix: u8) -> Self {
        Self {
            table,
            addr,
            prefix,
        }
    }

    /// The address with host bits cleared, as the firewall stores it.
    pub fn network(&self) -> Ipv4Addr {
        let bits = u32::from(self.addr);
        let mask = match self.prefix {
            0 => 0,
            p if p >= 32 => u32::MAX,
            p => u32::MAX << (32 - u32::from(p)),
        };
        Ipv4Addr::from(bits & mask)
    }
}

/// Formats as `addr/prefix`; the table is logged separately.
impl fmt::Display for TableEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// Synchronous access to the firewall's address tables.
pub trait TableAdapter: Send {
    /// Human-readable backend name (e.g. "ipfw", "memory").
    fn name(&self) -> &str;

    /// Number of tables the firewall provides.
    fn max_tables(&mut self) -> Result<u32, AdapterError>;

    /// Insert an entry. Fails with [`AdapterError::AlreadyExists`] if the
    /// key is present.
    fn add(&mut self, entry: &TableEntry) -> Result<(), AdapterError>;

    /// Remove an entry.
    fn delete(&mut self, entry: &TableEntry) -> Result<(), AdapterError>;

    /// Remove every entry from a table.
    fn flush(&mut self, table: u8) -> Result<(), AdapterError>;
}

impl<T: TableAdapter + ?Sized> TableAdapter for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn max_tables(&mut self) -> Result<u32, AdapterError> {
        (**self).max_tables()
    }

    fn add(&mut self, entry: &TableEntry) -> Result<(), AdapterError> {
        (**self).add(entry)
    }

    fn delete(&mut self, entry: &TableEntry) -> Result<(), AdapterError> {
        (**self).delete(entry)
    }

    fn flush(&mut self, table: u8) -> Result<(), AdapterError> {
        (**self).flush(table)
    }
}

/// Ask the backend for its table count, falling back to `fallback` when the
/// query fails. Without a fallback the query error is returned.
pub fn resolve_max_tables<A: TableAdapter + ?Sized>(
    adapter: &mut A,
    fallback: Option<u32>,
) -> Result<u32, AdapterError> {
    match adapter.max_tables() {
        Ok(n) => Ok(n),
        Err(e) => match fallback {
            Some(n) => {
                warn!(
                    backend = adapter.name(),
                    error = %e,
                    fallback = n,
                    "Cannot query table count, using fallback"
                );
                Ok(n)
            }
            None => Err(e),
        },
    }
}

/// Build the backend named in the configuration.
pub fn select_backend(config: &TablesConfig) -> Box<dyn TableAdapter> {
    match config.backend.as_str() {
        "memory" => {
            warn!("Using in-memory tables; no firewall state will change");
            Box::new(MemoryTables::new(config.memory_max_tables))
        }
        _ => Box::new(IpfwTables::new(&config.ipfw_path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct Unreachable;

    impl TableAdapter for Unreachable {
        fn name(&self) -> &str {
            "unreachable"
        }

        fn max_tables(&mut self) -> Result<u32, AdapterError> {
            Err(AdapterError::Failed("no firewall".to_string()))
        }

        fn add(&mut self, _: &TableEntry) -> Result<(), AdapterError> {
            unreachable!()
        }

        fn delete(&mut self, _: &TableEntry) -> Result<(), AdapterError> {
            unreachable!()
        }

        fn flush(&mut self, _: u8) -> Result<(), AdapterError> {
            unreachable!()
        }
    }

    #[test]
    fn test_network_masks_host_bits() {
        let entry = TableEntry::new(0, Ipv4Addr::new(10, 1, 2, 3), 16);
        assert_eq!(entry.network(), Ipv4Addr::new(10, 1, 0, 0));
        let host = TableEntry::new(0, Ipv4Addr::new(10, 1, 2, 3), 32);
        assert_eq!(host.network(), Ipv4Addr::new(10, 1, 2, 3));
        let any = TableEntry::new(0, Ipv4Addr::new(10, 1, 2, 3), 0);
        assert_eq!(any.network(), Ipv4Addr::UNSPECIFIED);
    }

    #[test]
    fn test_entry_display() {
        let entry = TableEntry::new(3, Ipv4Addr::new(192, 0, 2, 1), 32);
        assert_eq!(entry.to_string(), "192.0.2.1/32");
    }

    #[test]
    fn test_resolve_max_tables_uses_backend_answer() {
        let mut tables = MemoryTables::new(16);
        assert_eq!(resolve_max_tables(&mut tables, Some(128)).unwrap(), 16);
    }

    #[test]
    fn test_resolve_max_tables_falls_back() {
        assert_eq!(resolve_max_tables(&mut Unreachable, Some(128)).unwrap(), 128);
    }

    #[test]
    fn test_resolve_max_tables_without_fallback_fails() {
        assert!(resolve_max_tables(&mut Unreachable, None).is_err());
    }

    #[test]
    fn test_select_backend() {
        let config = TablesConfig {
            backend: "memory".to_string(),
            ..TablesConfig::default()
        };
        assert_eq!(select_backend(&config).name(), "memory");
        assert_eq!(select_backend(&TablesConfig::default()).name(), "ipfw");
    }
}
