//! Command dispatch: applies decoded records to the table adapter.
//!
//! Add is idempotent. When the key is already present the entry is deleted
//! and added again, so a repeated add refreshes its expiry instead of
//! failing. Delete and flush only report errors; they never touch the
//! expiry queue, and a queued entry that was removed early simply fails its
//! later delete.

use std::time::Instant;

use tracing::{debug, warn};

use crate::adapter::{AdapterError, TableAdapter};
use crate::expiry::ExpiryQueue;
use crate::protocol::{Command, Message};

/// Result of applying one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// New entry inserted.
    Added,
    /// Entry existed and was deleted and re-inserted.
    Replaced,
    Deleted,
    Flushed,
    /// The adapter rejected the operation.
    Failed,
}

/// Routes messages to a [`TableAdapter`].
#[derive(Debug)]
pub struct Dispatcher<A> {
    adapter: A,
    max_tables: u32,
}

impl<A: TableAdapter> Dispatcher<A> {
    /// `max_tables` bounds the table ids accepted from the wire.
    pub fn new(adapter: A, max_tables: u32) -> Self {
        Self {
            adapter,
            max_tables,
        }
    }

    pub fn max_tables(&self) -> u32 {
        self.max_tables
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn adapter_mut(&mut self) -> &mut A {
        &mut self.adapter
    }

    /// Apply `msg`, queueing successful adds for expiry.
    pub fn dispatch(&mut self, msg: &Message, expiry: &mut ExpiryQueue, now: Instant) -> Outcome {
        let entry = msg.entry();
        debug!(command = %msg.command, table = msg.table, entry = %entry, "Dispatching");

        match msg.command {
            Command::Add => {
                let outcome = match self.adapter.add(&entry) {
                    Ok(()) => Outcome::Added,
                    Err(AdapterError::AlreadyExists) => self.replace(msg),
                    Err(e) => {
                        warn!(table = msg.table, entry = %entry, error = %e, "Add failed");
                        Outcome::Failed
                    }
                };
                if outcome != Outcome::Failed {
                    expiry.enqueue(entry, now);
                }
                outcome
            }
            Command::Delete => match self.adapter.delete(&entry) {
                Ok(()) => Outcome::Deleted,
                Err(e) => {
                    warn!(table = msg.table, entry = %entry, error = %e, "Delete failed");
                    Outcome::Failed
                }
            },
            Command::Flush => match self.adapter.flush(msg.table) {
                Ok(()) => Outcome::Flushed,
                Err(e) => {
                    warn!(table = msg.table, error = %e, "Flush failed");
                    Outcome::Failed
                }
            },
        }
    }

    // Delete the existing key and insert it again, once.
    fn replace(&mut self, msg: &Message) -> Outcome {
        let entry = msg.entry();
        if let Err(e) = self.adapter.delete(&entry) {
            warn!(table = msg.table, entry = %entry, error = %e, "Delete before re-add failed");
            return Outcome::Failed;
        }
        match self.adapter.add(&entry) {
            Ok(()) => {
                debug!(table = msg.table, entry = %entry, "Existing entry refreshed");
                Outcome::Replaced
            }
            Err(e) => {
                warn!(table = msg.table, entry = %entry, error = %e, "Re-add failed");
                Outcome::Failed
            }
        }
    }
}
