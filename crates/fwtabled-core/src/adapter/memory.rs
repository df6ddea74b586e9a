//! In-memory table backend.
//!
//! Keeps tables in process memory with the same key semantics as the
//! firewall: entries are stored by network address and prefix, adding a
//! present key fails with `AlreadyExists`, deleting a missing key fails.

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

use tracing::debug;

use super::{AdapterError, TableAdapter, TableEntry};

/// In-process table store.
#[derive(Debug, Clone, Default)]
pub struct MemoryTables {
    max_tables: u32,
    tables: BTreeMap<u8, BTreeSet<(Ipv4Addr, u8)>>,
}

impl MemoryTables {
    /// Create an empty store reporting `max_tables` tables.
    pub fn new(max_tables: u32) -> Self {
        Self {
            max_tables,
            tables: BTreeMap::new(),
        }
    }

    /// Whether the table holds this entry.
    pub fn contains(&self, entry: &TableEntry) -> bool {
        self.tables
            .get(&entry.table)
            .is_some_and(|t| t.contains(&(entry.network(), entry.prefix)))
    }

    /// Entries of one table, in address order.
    pub fn entries(&self, table: u8) -> Vec<TableEntry> {
        self.tables
            .get(&table)
            .map(|t| {
                t.iter()
                    .map(|(addr, prefix)| TableEntry::new(table, *addr, *prefix))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Total number of entries across all tables.
    pub fn len(&self) -> usize {
        self.tables.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_table(&self, table: u8) -> Result<(), AdapterError> {
        if u32::from(table) >= self.max_tables {
            return Err(AdapterError::Failed(format!("no such table {table}")));
        }
        Ok(())
    }
}

impl TableAdapter for MemoryTables {
    fn name(&self) -> &str {
        "memory"
    }

    fn max_tables(&mut self) -> Result<u32, AdapterError> {
        Ok(self.max_tables)
    }

    fn add(&mut self, entry: &TableEntry) -> Result<(), AdapterError> {
        self.check_table(entry.table)?;
        debug!(table = entry.table, entry = %entry, "memory: add");
        let inserted = self
            .tables
            .entry(entry.table)
            .or_default()
            .insert((entry.network(), entry.prefix));
        if inserted {
            Ok(())
        } else {
            Err(AdapterError::AlreadyExists)
        }
    }

    fn delete(&mut self, entry: &TableEntry) -> Result<(), AdapterError> {
        self.check_table(entry.table)?;
        debug!(table = entry.table, entry = %entry, "memory: delete");
        let removed = self
            .tables
            .get_mut(&entry.table)
            .is_some_and(|t| t.remove(&(entry.network(), entry.prefix)));
        if removed {
            Ok(())
        } else {
            Err(AdapterError::Failed(format!("{entry} not in table {}", entry.table)))
        }
    }

    fn flush(&mut self, table: u8) -> Result<(), AdapterError> {
        self.check_table(table)?;
        debug!(table, "memory: flush");
        self.tables.remove(&table);
        Ok(())
    }
}
