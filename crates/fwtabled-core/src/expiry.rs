//! Expiry queue: automatic removal of table entries after their TTL.
//!
//! Entries are kept in one FIFO ordered by insertion time. Cleanup only
//! ever looks at the head: it pops and deletes entries while the head is
//! due, and stops at the first head that is not. An entry for a short-TTL
//! table queued behind one for a long-TTL table therefore waits for the
//! long one to expire first.
//!
//! There is no timer thread. The event loop asks [`ExpiryQueue::next_timeout`]
//! how long it may block, and runs [`ExpiryQueue::cleanup`] when the wait
//! times out or when [`ExpiryQueue::cleanup_overdue`] reports that socket
//! activity has kept cleanup from running for too long.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use fwtabled_config::{AppConfig, ConfigError, ExpiryPolicy};
use tracing::{debug, trace, warn};

use crate::adapter::{TableAdapter, TableEntry};

/// A queued entry awaiting expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryEntry {
    pub entry: TableEntry,
    pub inserted_at: Instant,
}

/// FIFO of entries with a TTL.
#[derive(Debug)]
pub struct ExpiryQueue {
    policy: ExpiryPolicy,
    entries: VecDeque<ExpiryEntry>,
    min_interval: Duration,
    max_delay: Duration,
    last_cleanup: Instant,
}

impl ExpiryQueue {
    /// Create a queue for `policy`.
    ///
    /// `min_interval` bounds how often the loop wakes for cleanup;
    /// `max_delay` is the watchdog threshold after which cleanup runs even
    /// while sockets stay busy.
    pub fn new(policy: ExpiryPolicy, min_interval: Duration, max_delay: Duration) -> Self {
        Self {
            policy,
            entries: VecDeque::new(),
            min_interval,
            max_delay,
            last_cleanup: Instant::now(),
        }
    }

    /// Create a queue from the `[expiry]` configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            config.expiry_policy()?,
            config.min_cleanup_interval(),
            config.max_cleanup_delay(),
        ))
    }

    /// Whether any table has a TTL.
    pub fn is_active(&self) -> bool {
        self.policy.is_active()
    }

    /// TTL configured for `table`.
    pub fn ttl(&self, table: u8) -> Option<Duration> {
        self.policy.ttl(table)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Queue `entry` for removal if its table has a TTL. Returns whether it
    /// was queued.
    pub fn enqueue(&mut self, entry: TableEntry, now: Instant) -> bool {
        let Some(ttl) = self.policy.ttl(entry.table) else {
            return false;
        };
        trace!(table = entry.table, entry = %entry, ttl_secs = ttl.as_secs(), "Queued for expiry");
        self.entries.push_back(ExpiryEntry {
            entry,
            inserted_at: now,
        });
        true
    }

    /// When `queued` falls due. `None` means never, which is also what a
    /// TTL too large to represent as an `Instant` amounts to.
    fn due_at(&self, queued: &ExpiryEntry) -> Option<Instant> {
        let ttl = self.policy.ttl(queued.entry.table)?;
        queued.inserted_at.checked_add(ttl)
    }

    /// Delete every entry at the head of the queue that is due at `now`.
    /// Returns the number of entries removed from the queue.
    pub fn cleanup<A: TableAdapter + ?Sized>(&mut self, adapter: &mut A, now: Instant) -> usize {
        self.last_cleanup = now;
        let mut evicted = 0;

        while let Some(head) = self.entries.front() {
            match self.due_at(head) {
                Some(due) if due <= now => {}
                _ => break,
            }
            let Some(queued) = self.entries.pop_front() else {
                break;
            };
            let entry = queued.entry;
            match adapter.delete(&entry) {
                Ok(()) => debug!(table = entry.table, entry = %entry, "Expired entry removed"),
                Err(e) => warn!(
                    table = entry.table,
                    entry = %entry,
                    error = %e,
                    "Failed to remove expired entry"
                ),
            }
            evicted += 1;
        }

        if evicted > 0 {
            debug!(evicted, remaining = self.entries.len(), "Expiry cleanup pass");
        }
        evicted
    }

    /// How far past its due time the head is at `now`.
    pub fn lag(&self, now: Instant) -> Duration {
        self.entries
            .front()
            .and_then(|head| self.due_at(head))
            .map(|due| now.saturating_duration_since(due))
            .unwrap_or_default()
    }

    /// How long the event loop may wait before the next cleanup pass, or
    /// `None` when there is nothing to expire.
    pub fn next_timeout(&self, now: Instant) -> Option<Duration> {
        let head = self.entries.front()?;
        let due = self.due_at(head)?;

        match due.checked_duration_since(now) {
            Some(remaining) if !remaining.is_zero() => Some(remaining.max(self.min_interval)),
            _ => {
                trace!(lag_ms = self.lag(now).as_millis() as u64, "Expiry cleanup lagging");
                Some(self.min_interval)
            }
        }
    }

    /// Whether cleanup must run on this wakeup regardless of socket
    /// activity: the head is due by more than the watchdog threshold, or
    /// no cleanup has run for that long.
    pub fn cleanup_overdue(&self, now: Instant) -> bool {
        !self.entries.is_empty()
            && (self.lag(now) > self.max_delay
                || now.saturating_duration_since(self.last_cleanup) >= self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryTables;
    use fwtabled_config::ExpiryRule;
    use pretty_assertions::assert_eq;
    use std::net::Ipv4Addr;

    const MIN: Duration = Duration::from_millis(500);
    const MAX: Duration = Duration::from_secs(2);

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn entry(table: u8, last: u8) -> TableEntry {
        TableEntry::new(table, Ipv4Addr::new(192, 0, 2, last), 32)
    }

    fn queue(rules: &[ExpiryRule]) -> ExpiryQueue {
        ExpiryQueue::new(ExpiryPolicy::from_rules(rules), MIN, MAX)
    }

    fn tables_with(entries: &[TableEntry]) -> MemoryTables {
        let mut tables = MemoryTables::new(8);
        for e in entries {
            tables.add(e).unwrap();
        }
        tables
    }

    #[test]
    fn test_enqueue_requires_ttl() {
        let mut q = queue(&[ExpiryRule::table(0, 10)]);
        let now = Instant::now();
        assert!(q.enqueue(entry(0, 1), now));
        assert!(!q.enqueue(entry(1, 1), now));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_no_policy_never_evicts() {
        let mut q = queue(&[]);
        let t0 = Instant::now();
        let mut tables = tables_with(&[entry(0, 1)]);

        assert!(!q.is_active());
        assert!(!q.enqueue(entry(0, 1), t0));
        assert_eq!(q.cleanup(&mut tables, t0 + secs(1_000_000)), 0);
        assert!(tables.contains(&entry(0, 1)));
        assert_eq!(q.next_timeout(t0), None);
    }

    #[test]
    fn test_entries_expire_in_insertion_order() {
        let mut q = queue(&[ExpiryRule::table(0, 10)]);
        let t0 = Instant::now();
        let (a, b, c) = (entry(0, 1), entry(0, 2), entry(0, 3));
        let mut tables = tables_with(&[a, b, c]);
        q.enqueue(a, t0);
        q.enqueue(b, t0 + secs(1));
        q.enqueue(c, t0 + secs(2));

        assert_eq!(q.cleanup(&mut tables, t0 + secs(9)), 0);
        assert_eq!(q.cleanup(&mut tables, t0 + secs(10)), 1);
        assert!(!tables.contains(&a));
        assert!(tables.contains(&b));

        assert_eq!(q.cleanup(&mut tables, t0 + secs(12)), 2);
        assert!(tables.is_empty());
        assert!(q.is_empty());
    }

    #[test]
    fn test_short_ttl_waits_behind_long_ttl_head() {
        let mut q = queue(&[ExpiryRule::table(0, 100), ExpiryRule::table(1, 1)]);
        let t0 = Instant::now();
        let (long, short) = (entry(0, 1), entry(1, 2));
        let mut tables = tables_with(&[long, short]);
        q.enqueue(long, t0);
        q.enqueue(short, t0);

        // The short entry is long overdue but sits behind the long one.
        assert_eq!(q.cleanup(&mut tables, t0 + secs(50)), 0);
        assert!(tables.contains(&short));

        assert_eq!(q.cleanup(&mut tables, t0 + secs(100)), 2);
        assert!(!tables.contains(&long));
        assert!(!tables.contains(&short));
    }

    #[test]
    fn test_cleanup_survives_adapter_errors() {
        let mut q = queue(&[ExpiryRule::all(1)]);
        let t0 = Instant::now();
        // Entry deleted out of band: the redundant delete fails but the
        // queue still drains.
        let mut tables = MemoryTables::new(8);
        q.enqueue(entry(0, 1), t0);
        assert_eq!(q.cleanup(&mut tables, t0 + secs(1)), 1);
        assert!(q.is_empty());
    }

    #[test]
    fn test_next_timeout_tracks_head() {
        let mut q = queue(&[ExpiryRule::table(0, 10)]);
        let t0 = Instant::now();
        assert_eq!(q.next_timeout(t0), None);

        q.enqueue(entry(0, 1), t0);
        assert_eq!(q.next_timeout(t0), Some(secs(10)));
        assert_eq!(q.next_timeout(t0 + secs(4)), Some(secs(6)));
    }

    #[test]
    fn test_next_timeout_is_bounded_below() {
        let mut q = queue(&[ExpiryRule::table(0, 10)]);
        let t0 = Instant::now();
        q.enqueue(entry(0, 1), t0);

        assert_eq!(q.next_timeout(t0 + Duration::from_millis(9_900)), Some(MIN));
        // Already due: still wait the minimum interval.
        assert_eq!(q.next_timeout(t0 + secs(11)), Some(MIN));
        assert_eq!(q.lag(t0 + secs(11)), secs(1));
    }

    #[test]
    fn test_cleanup_overdue_when_lagging() {
        let mut q = queue(&[ExpiryRule::table(0, 10)]);
        let t0 = Instant::now();
        let mut tables = tables_with(&[entry(0, 1)]);
        q.enqueue(entry(0, 1), t0);
        q.cleanup(&mut tables, t0);

        assert!(!q.cleanup_overdue(t0 + secs(1)));
        assert!(q.cleanup_overdue(t0 + secs(13)));

        q.cleanup(&mut tables, t0 + secs(13));
        assert!(!q.cleanup_overdue(t0 + secs(13)));
    }

    #[test]
    fn test_cleanup_overdue_watchdog_since_last_pass() {
        let mut q = queue(&[ExpiryRule::table(0, 100)]);
        let t0 = Instant::now();
        let mut tables = MemoryTables::new(8);
        q.enqueue(entry(0, 1), t0);
        q.cleanup(&mut tables, t0);

        assert!(!q.cleanup_overdue(t0 + secs(1)));
        assert!(q.cleanup_overdue(t0 + MAX));
    }

    #[test]
    fn test_unrepresentable_ttl_is_never_due() {
        let mut q = queue(&[ExpiryRule::all(u64::MAX)]);
        let t0 = Instant::now();
        let mut tables = tables_with(&[entry(0, 1)]);
        assert!(q.enqueue(entry(0, 1), t0));

        assert_eq!(q.next_timeout(t0), None);
        assert_eq!(q.lag(t0 + secs(3600)), Duration::ZERO);
        assert_eq!(q.cleanup(&mut tables, t0 + secs(3600)), 0);
        assert!(tables.contains(&entry(0, 1)));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_empty_queue_never_overdue() {
        let q = queue(&[ExpiryRule::all(1)]);
        assert!(!q.cleanup_overdue(Instant::now() + secs(3600)));
    }
}
