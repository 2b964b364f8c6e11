// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Engine counters.
//!
//! Each worker thread increments its own cache-line-aligned slot of plain
//! atomics; readers merge all slots into a [`StatsSnapshot`]. Counters are
//! monotonic except `max_item_set`, which merges by maximum.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Per-thread counter slot.
///
/// Aligned to two cache lines so that neighboring threads never share a
/// line while hammering their own counters.
#[derive(Debug, Default)]
#[repr(align(128))]
pub(crate) struct ThreadStats {
    starts: AtomicU64,
    aborts: AtomicU64,
    commit_time_aborts: AtomicU64,
    max_item_set: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
    searches: AtomicU64,
}

impl ThreadStats {
    pub(crate) fn record_start(&self) {
        self.starts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abort(&self) {
        self.aborts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit_time_abort(&self) {
        self.commit_time_aborts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_search(&self) {
        self.searches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_item_set_size(&self, size: usize) {
        let size = size as u64;
        let mut cur = self.max_item_set.load(Ordering::Relaxed);
        while size > cur {
            match self.max_item_set.compare_exchange_weak(
                cur,
                size,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(seen) => cur = seen,
            }
        }
    }

    /// Snapshot of this slot alone.
    #[cfg(test)]
    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        let mut out = StatsSnapshot::default();
        self.merge_into(&mut out);
        out
    }

    fn merge_into(&self, out: &mut StatsSnapshot) {
        out.starts += self.starts.load(Ordering::Relaxed);
        out.aborts += self.aborts.load(Ordering::Relaxed);
        out.commit_time_aborts += self.commit_time_aborts.load(Ordering::Relaxed);
        out.max_item_set = out.max_item_set.max(self.max_item_set.load(Ordering::Relaxed));
        out.reads += self.reads.load(Ordering::Relaxed);
        out.writes += self.writes.load(Ordering::Relaxed);
        out.searches += self.searches.load(Ordering::Relaxed);
    }
}

/// Read-only merged view of every thread's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Transactions started (every reset counts).
    pub starts: u64,
    /// Transactions aborted for any reason.
    pub aborts: u64,
    /// Aborts raised by read validation during commit.
    pub commit_time_aborts: u64,
    /// Largest item set observed at commit.
    pub max_item_set: u64,
    /// Reads validated by `check_reads`.
    pub reads: u64,
    /// Writes installed.
    pub writes: u64,
    /// Item-set lookups performed by `item`/`read_item`/`check_item`.
    pub searches: u64,
}

/// One [`ThreadStats`] slot per worker thread.
#[derive(Debug)]
pub(crate) struct StatsRegistry {
    threads: Box<[Arc<ThreadStats>]>,
}

impl StatsRegistry {
    pub(crate) fn new(max_threads: usize) -> Self {
        Self {
            threads: (0..max_threads).map(|_| Arc::new(ThreadStats::default())).collect(),
        }
    }

    pub(crate) fn thread(&self, tid: usize) -> Arc<ThreadStats> {
        Arc::clone(&self.threads[tid])
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        let mut out = StatsSnapshot::default();
        for slot in self.threads.iter() {
            slot.merge_into(&mut out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_merge() {
        let registry = StatsRegistry::new(2);
        registry.thread(0).record_start();
        registry.thread(0).record_start();
        registry.thread(1).record_start();
        registry.thread(1).record_abort();
        registry.thread(0).record_commit_time_abort();

        let snap = registry.snapshot();
        assert_eq!(snap.starts, 3);
        assert_eq!(snap.aborts, 1);
        assert_eq!(snap.commit_time_aborts, 1);
    }

    #[test]
    fn test_max_item_set_merges_by_max() {
        let registry = StatsRegistry::new(2);
        registry.thread(0).record_item_set_size(10);
        registry.thread(0).record_item_set_size(4);
        registry.thread(1).record_item_set_size(7);

        assert_eq!(registry.snapshot().max_item_set, 10);
    }

    #[test]
    fn test_thread_slots_are_shared() {
        let registry = StatsRegistry::new(1);
        let a = registry.thread(0);
        let b = registry.thread(0);
        a.record_write();
        b.record_write();
        assert_eq!(registry.snapshot().writes, 2);
    }
}
