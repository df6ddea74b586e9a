//! Recording table backend.
//!
//! [`RecordingTables`] wraps [`MemoryTables`] behind a shared handle and
//! logs every adapter call with its outcome. Clone it before handing it to
//! a daemon; the clone kept by the test sees the same state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use fwtabled_core::{AdapterError, MemoryTables, TableAdapter, TableEntry};

/// One adapter call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableCall {
    Add(TableEntry),
    Delete(TableEntry),
    Flush(u8),
}

/// What the adapter answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Ok,
    AlreadyExists,
    Failed,
}

impl CallOutcome {
    fn of(result: &Result<(), AdapterError>) -> Self {
        match result {
            Ok(()) => CallOutcome::Ok,
            Err(AdapterError::AlreadyExists) => CallOutcome::AlreadyExists,
            Err(_) => CallOutcome::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedCall {
    pub call: TableCall,
    pub outcome: CallOutcome,
}

#[derive(Debug)]
struct State {
    tables: MemoryTables,
    calls: Vec<RecordedCall>,
    fail_max_tables: bool,
}

/// Shared, recording in-memory backend.
#[derive(Debug, Clone)]
pub struct RecordingTables {
    state: Arc<Mutex<State>>,
}

impl RecordingTables {
    pub fn new(max_tables: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                tables: MemoryTables::new(max_tables),
                calls: Vec::new(),
                fail_max_tables: false,
            })),
        }
    }

    /// Make the table-count query fail, as on a host without the firewall.
    pub fn failing_max_tables(self) -> Self {
        self.lock().fail_max_tables = true;
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Calls made so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn contains(&self, entry: &TableEntry) -> bool {
        self.lock().tables.contains(entry)
    }

    pub fn entries(&self, table: u8) -> Vec<TableEntry> {
        self.lock().tables.entries(table)
    }

    pub fn is_empty(&self) -> bool {
        self.lock().tables.is_empty()
    }

    fn record(&self, call: TableCall, result: Result<(), AdapterError>) -> Result<(), AdapterError> {
        self.lock().calls.push(RecordedCall {
            call,
            outcome: CallOutcome::of(&result),
        });
        result
    }
}

impl TableAdapter for RecordingTables {
    fn name(&self) -> &str {
        "recording"
    }

    fn max_tables(&mut self) -> Result<u32, AdapterError> {
        let mut state = self.lock();
        if state.fail_max_tables {
            return Err(AdapterError::Failed("table count unavailable".to_string()));
        }
        state.tables.max_tables()
    }

    fn add(&mut self, entry: &TableEntry) -> Result<(), AdapterError> {
        let result = self.lock().tables.add(entry);
        self.record(TableCall::Add(*entry), result)
    }

    fn delete(&mut self, entry: &TableEntry) -> Result<(), AdapterError> {
        let result = self.lock().tables.delete(entry);
        self.record(TableCall::Delete(*entry), result)
    }

    fn flush(&mut self, table: u8) -> Result<(), AdapterError> {
        let result = self.lock().tables.flush(table);
        self.record(TableCall::Flush(table), result)
    }
}
