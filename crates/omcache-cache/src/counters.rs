//! Runtime counters for the replication queues.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::store::ExpirationReport;

/// Monotonic counters updated by the background tasks.
#[derive(Debug, Default)]
pub struct CacheCounters {
    batches_committed: AtomicU64,
    updates_committed: AtomicU64,
    updates_rejected: AtomicU64,
    updates_applied: AtomicU64,
    apply_failures: AtomicU64,
    empty_polls: AtomicU64,
    hold_timeouts: AtomicU64,
    expiration_sweeps: AtomicU64,
    entries_expired: AtomicU64,
}

/// Point-in-time copy of [`CacheCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub batches_committed: u64,
    pub updates_committed: u64,
    pub updates_rejected: u64,
    pub updates_applied: u64,
    pub apply_failures: u64,
    pub empty_polls: u64,
    pub hold_timeouts: u64,
    pub expiration_sweeps: u64,
    pub entries_expired: u64,
}

impl CacheCounters {
    pub(crate) fn record_batch(&self, committed: usize, rejected: usize) {
        self.batches_committed.fetch_add(1, Ordering::Relaxed);
        self.updates_committed
            .fetch_add(committed as u64, Ordering::Relaxed);
        self.updates_rejected
            .fetch_add(rejected as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_applied(&self) {
        self.updates_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_apply_failure(&self) {
        self.apply_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_empty_poll(&self) {
        self.empty_polls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_hold_timeout(&self) {
        self.hold_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sweep(&self, report: &ExpirationReport) {
        self.expiration_sweeps.fetch_add(1, Ordering::Relaxed);
        self.entries_expired
            .fetch_add(report.total_expired() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            batches_committed: self.batches_committed.load(Ordering::Relaxed),
            updates_committed: self.updates_committed.load(Ordering::Relaxed),
            updates_rejected: self.updates_rejected.load(Ordering::Relaxed),
            updates_applied: self.updates_applied.load(Ordering::Relaxed),
            apply_failures: self.apply_failures.load(Ordering::Relaxed),
            empty_polls: self.empty_polls.load(Ordering::Relaxed),
            hold_timeouts: self.hold_timeouts.load(Ordering::Relaxed),
            expiration_sweeps: self.expiration_sweeps.load(Ordering::Relaxed),
            entries_expired: self.entries_expired.load(Ordering::Relaxed),
        }
    }
}
