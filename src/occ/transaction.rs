// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! The optimistic transaction: per-thread item set and the commit pipeline.
//!
//! A transaction accumulates items while user code runs against shared
//! objects, with no locks held. Commit is two-phase locked: write items are
//! locked in a canonical global order, reads are validated, writes are
//! installed in insertion order, locks are released, and every item gets a
//! cleanup call carrying the verdict. Validation failure turns the commit
//! into an abort; the caller sees a plain `false` and may retry.

use std::sync::Arc;

use tracing::trace;

use crate::config::DEFAULT_ITEM_CAPACITY;
use crate::stats::ThreadStats;

use super::buffer::{Packable, Packed, TxnBuffer};
use super::item::{ItemProxy, TxnItem};
use super::shared::{shared_id, Shared};

/// Read/write key sets captured from a committed piece of the item set.
///
/// This is the bridge the chopping layer uses: the keys published here are
/// what concurrent same-rank pieces compare against for overlap.
#[derive(Debug, Default)]
pub(crate) struct CommitFootprint {
    pub(crate) read_keys: Vec<Packed>,
    pub(crate) write_keys: Vec<Packed>,
    pub(crate) write_values: Vec<Packed>,
}

/// A per-thread optimistic transaction.
///
/// Owned exclusively by its thread; nothing here is shared. Reusable:
/// [`reset`](Self::reset) starts the next transaction in place.
pub struct Transaction {
    pub(crate) items: Vec<TxnItem>,
    pub(crate) buf: TxnBuffer,
    first_write: Option<usize>,
    may_duplicate: bool,
    aborted: bool,
    stats: Arc<ThreadStats>,
}

impl Transaction {
    /// Creates a standalone transaction with its own counter slot.
    pub fn new() -> Self {
        Self::with_stats(DEFAULT_ITEM_CAPACITY, Arc::new(ThreadStats::default()))
    }

    pub(crate) fn with_stats(capacity: usize, stats: Arc<ThreadStats>) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            buf: TxnBuffer::new(),
            first_write: None,
            may_duplicate: false,
            aborted: false,
            stats,
        }
    }

    /// Starts a fresh transaction in place, clearing the item set and the
    /// packed-value buffer.
    pub fn reset(&mut self) {
        self.items.clear();
        self.buf.clear();
        self.first_write = None;
        self.may_duplicate = false;
        self.aborted = false;
        self.stats.record_start();
    }

    /// Returns true if this transaction has aborted.
    #[inline]
    pub fn aborted(&self) -> bool {
        self.aborted
    }

    /// Number of items currently in the set.
    #[inline]
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    #[cfg(test)]
    pub(crate) fn stats(&self) -> &Arc<ThreadStats> {
        &self.stats
    }

    /// Get-or-insert the item for `(shared, key)`.
    pub fn item<K: Packable>(&mut self, shared: &Arc<dyn Shared>, key: K) -> ItemProxy<'_> {
        let key = self.buf.pack_unique(key);
        let index = match self.find_item(shared, &key, false) {
            Some(index) => index,
            None => self.push_item(shared, key),
        };
        ItemProxy { txn: self, index }
    }

    /// Get-or-insert for a read-only access.
    ///
    /// Before the first write the set skips the lookup entirely and allows
    /// duplicate read entries; they are consolidated (keeping the oldest
    /// stamp) the first time a write-path lookup runs.
    pub fn read_item<K: Packable>(&mut self, shared: &Arc<dyn Shared>, key: K) -> ItemProxy<'_> {
        let key = self.buf.pack_unique(key);
        let index = match self.find_item(shared, &key, true) {
            Some(index) => index,
            None => self.push_item(shared, key),
        };
        ItemProxy { txn: self, index }
    }

    /// Finds the item for `(shared, key)` without inserting.
    pub fn check_item<K: Packable>(
        &mut self,
        shared: &Arc<dyn Shared>,
        key: K,
    ) -> Option<ItemProxy<'_>> {
        let key = self.buf.pack_unique(key);
        let index = self.find_item(shared, &key, false)?;
        Some(ItemProxy { txn: self, index })
    }

    fn push_item(&mut self, shared: &Arc<dyn Shared>, key: Packed) -> usize {
        self.items.push(TxnItem::new(Arc::clone(shared), key));
        self.items.len() - 1
    }

    fn find_item(&mut self, shared: &Arc<dyn Shared>, key: &Packed, read_only: bool) -> Option<usize> {
        if read_only && self.first_write.is_none() {
            self.may_duplicate = true;
            return None;
        }
        if !read_only && self.first_write.is_none() {
            self.consolidate_reads();
        }

        let id = shared_id(shared);
        for (index, item) in self.items.iter().enumerate() {
            self.stats.record_search();
            if shared_id(&item.shared) == id && item.key == *key {
                return Some(index);
            }
        }
        None
    }

    /// Sorts the (still read-only) set and drops duplicate entries, keeping
    /// the first of each: the oldest read stamp is the one to validate.
    fn consolidate_reads(&mut self) {
        self.items.sort_by(|a, b| a.canonical_key().cmp(&b.canonical_key()));
        self.items.dedup_by(|a, b| a.same_entry(b));
    }

    pub(crate) fn mark_write(&mut self, index: usize) {
        if self.first_write.map_or(true, |first| index < first) {
            self.first_write = Some(index);
        }
    }

    /// Validates every read-flagged item against current shared state.
    ///
    /// On failure the transaction aborts in place (every item receives
    /// `cleanup(_, false)`) and the method returns false.
    #[must_use]
    pub fn check_reads(&mut self) -> bool {
        if self.validate_reads() {
            true
        } else {
            self.silent_abort();
            false
        }
    }

    fn validate_reads(&self) -> bool {
        for index in 0..self.items.len() {
            if self.items[index].has_read() {
                self.stats.record_read();
                let shared = Arc::clone(&self.items[index].shared);
                if !shared.check(&self.items[index], self) {
                    return false;
                }
            }
        }
        true
    }

    /// Attempts to commit the item set.
    ///
    /// Returns true on success. On validation failure the transaction
    /// aborts (cleanup with `committed = false` on every item) and the
    /// caller may [`reset`](Self::reset) and retry.
    pub fn try_commit(&mut self) -> bool {
        let ok = self.commit_pipeline();
        self.items.clear();
        ok
    }

    /// Commits the item set as one piece of a chopped transaction and
    /// extracts its footprint. The packed-value buffer is left intact so
    /// key handles stay canonical across the pieces of one transaction.
    pub(crate) fn try_commit_piece(&mut self) -> Option<CommitFootprint> {
        let ok = self.commit_pipeline();
        let footprint = if ok { Some(self.collect_footprint()) } else { None };
        self.items.clear();
        footprint
    }

    /// Explicitly aborts the transaction. Idempotent.
    pub fn abort(&mut self) {
        self.silent_abort();
        self.items.clear();
    }

    fn silent_abort(&mut self) {
        if self.aborted {
            return;
        }
        self.aborted = true;
        self.stats.record_abort();
        for index in 0..self.items.len() {
            let shared = Arc::clone(&self.items[index].shared);
            shared.cleanup(&mut self.items[index], false);
        }
    }

    /// Sort write indices, lock canonically, validate, install in insertion
    /// order, unlock, clean up.
    fn commit_pipeline(&mut self) -> bool {
        self.stats.record_item_set_size(self.items.len());

        if self.aborted {
            return false;
        }

        let first_write = self.first_write.unwrap_or(self.items.len());
        let mut permute: Vec<usize> = (first_write..self.items.len())
            .filter(|&index| self.items[index].has_write())
            .collect();
        permute.sort_by(|&i, &j| self.items[i].canonical_key().cmp(&self.items[j].canonical_key()));

        // Phase 1: lock in canonical order; duplicate entries for the same
        // logical key take the lock once.
        let mut cursor = 0;
        while cursor < permute.len() {
            let index = permute[cursor];
            let shared = Arc::clone(&self.items[index].shared);
            shared.lock(&mut self.items[index]);
            cursor += 1;
            if self.may_duplicate {
                while cursor < permute.len()
                    && self.items[permute[cursor]].same_entry(&self.items[index])
                {
                    cursor += 1;
                }
            }
        }

        // Phase 2: validate reads under the write locks.
        let success = self.validate_reads();

        // Phase 3: install in insertion order so intra-transaction write
        // order is what callers observe.
        if success {
            for index in first_write..self.items.len() {
                if self.items[index].has_write() {
                    self.stats.record_write();
                    let shared = Arc::clone(&self.items[index].shared);
                    shared.install(&mut self.items[index]);
                }
            }
        }

        // Unlock in the same canonical walk, then deliver the verdict.
        cursor = 0;
        while cursor < permute.len() {
            let index = permute[cursor];
            let shared = Arc::clone(&self.items[index].shared);
            shared.unlock(&mut self.items[index]);
            cursor += 1;
            if self.may_duplicate {
                while cursor < permute.len()
                    && self.items[permute[cursor]].same_entry(&self.items[index])
                {
                    cursor += 1;
                }
            }
        }

        if success {
            for index in 0..self.items.len() {
                let shared = Arc::clone(&self.items[index].shared);
                shared.cleanup(&mut self.items[index], true);
            }
        } else {
            trace!(items = self.items.len(), "read validation failed at commit");
            self.stats.record_commit_time_abort();
            self.silent_abort();
        }

        success
    }

    fn collect_footprint(&self) -> CommitFootprint {
        let mut footprint = CommitFootprint::default();
        for item in &self.items {
            if item.has_read() {
                footprint.read_keys.push(item.key.clone());
            }
            if let Some(wdata) = &item.wdata {
                footprint.write_keys.push(item.key.clone());
                footprint.write_values.push(wdata.clone());
            }
        }
        footprint
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("items", &self.items.len())
            .field("first_write", &self.first_write)
            .field("aborted", &self.aborted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Records every contract call so tests can assert ordering.
    struct Probe {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail_check: AtomicBool,
    }

    impl Probe {
        fn new(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn Shared> {
            Arc::new(Self {
                name,
                log: Arc::clone(log),
                fail_check: AtomicBool::new(false),
            })
        }

        fn failing(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn Shared> {
            Arc::new(Self {
                name,
                log: Arc::clone(log),
                fail_check: AtomicBool::new(true),
            })
        }

        fn record(&self, event: &str, item: &TxnItem) {
            let key = item.key::<u64>().unwrap_or(u64::MAX);
            self.log.lock().push(format!("{} {} {}", self.name, event, key));
        }
    }

    impl Shared for Probe {
        fn lock(&self, item: &mut TxnItem) {
            self.record("lock", item);
        }

        fn check(&self, item: &TxnItem, _txn: &Transaction) -> bool {
            self.record("check", item);
            !self.fail_check.load(Ordering::Relaxed)
        }

        fn install(&self, item: &mut TxnItem) {
            self.record("install", item);
        }

        fn unlock(&self, item: &mut TxnItem) {
            self.record("unlock", item);
        }

        fn cleanup(&self, item: &mut TxnItem, committed: bool) {
            let event = if committed { "cleanup+" } else { "cleanup-" };
            self.record(event, item);
        }
    }

    fn log() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[test]
    fn test_empty_commit_is_idempotent() {
        let mut txn = Transaction::new();
        assert!(txn.try_commit());
        assert!(txn.try_commit());
        assert!(!txn.aborted());
    }

    #[test]
    fn test_item_get_or_insert() {
        let events = log();
        let shared = Probe::new("a", &events);
        let mut txn = Transaction::new();
        let first = txn.item(&shared, 1u64).index();
        txn.item(&shared, 1u64).add_write(5u64);
        let second = txn.item(&shared, 1u64).index();
        assert_eq!(first, second);
        assert_eq!(txn.item_count(), 1);
    }

    #[test]
    fn test_read_item_duplicates_until_first_write() {
        let events = log();
        let shared = Probe::new("a", &events);
        let mut txn = Transaction::new();
        txn.read_item(&shared, 1u64).add_read(10u64);
        txn.read_item(&shared, 1u64).add_read(20u64);
        assert_eq!(txn.item_count(), 2);

        // The write-path lookup consolidates, keeping the oldest stamp.
        txn.item(&shared, 1u64).add_write(5u64);
        assert_eq!(txn.item_count(), 1);
        let item = txn.check_item(&shared, 1u64).unwrap();
        assert_eq!(item.read_value::<u64>(), Some(10));
        assert!(item.has_write());
    }

    #[test]
    fn test_locks_taken_in_key_order_installs_in_insertion_order() {
        let events = log();
        let shared = Probe::new("a", &events);
        let mut txn = Transaction::new();
        txn.item(&shared, 2u64).add_write(20u64);
        txn.item(&shared, 1u64).add_write(10u64);
        assert!(txn.try_commit());

        let seen = events.lock().clone();
        let pos = |event: &str| seen.iter().position(|e| e == event).unwrap();
        // Canonical lock order: key 1 before key 2.
        assert!(pos("a lock 1") < pos("a lock 2"));
        // Insertion-order install: key 2 before key 1.
        assert!(pos("a install 2") < pos("a install 1"));
        // Unlocks after installs, cleanups last.
        assert!(pos("a install 1") < pos("a unlock 1"));
        assert!(pos("a unlock 2") < pos("a cleanup+ 2"));
    }

    #[test]
    fn test_lock_order_spans_shared_objects() {
        let events = log();
        let first = Probe::new("a", &events);
        let second = Probe::new("b", &events);
        let mut txn = Transaction::new();
        txn.item(&second, 1u64).add_write(1u64);
        txn.item(&first, 1u64).add_write(1u64);
        assert!(txn.try_commit());

        let seen = events.lock().clone();
        let lock_events: Vec<&String> =
            seen.iter().filter(|e| e.contains(" lock ")).collect();
        assert_eq!(lock_events.len(), 2);
        // Whatever the address order is, locking must match it.
        let lo = if shared_id(&first) < shared_id(&second) { "a" } else { "b" };
        assert!(lock_events[0].starts_with(lo));
    }

    #[test]
    fn test_validation_failure_aborts_and_unlocks() {
        let events = log();
        let shared = Probe::failing("a", &events);
        let mut txn = Transaction::new();
        txn.item(&shared, 1u64).add_read(10u64).add_write(11u64);
        assert!(!txn.try_commit());
        assert!(txn.aborted());

        let seen = events.lock().clone();
        let pos = |event: &str| seen.iter().position(|e| e == event).unwrap();
        assert!(pos("a lock 1") < pos("a check 1"));
        assert!(pos("a check 1") < pos("a unlock 1"));
        assert!(pos("a unlock 1") < pos("a cleanup- 1"));
        assert!(!seen.iter().any(|e| e.contains("install")));

        let snap = txn.stats().snapshot();
        assert_eq!(snap.aborts, 1);
        assert_eq!(snap.commit_time_aborts, 1);
    }

    #[test]
    fn test_check_reads_standalone() {
        let events = log();
        let shared = Probe::new("a", &events);
        let mut txn = Transaction::new();
        txn.read_item(&shared, 3u64).add_read(30u64);
        assert!(txn.check_reads());
        assert!(!txn.aborted());

        let failing = Probe::failing("b", &events);
        txn.reset();
        txn.read_item(&failing, 3u64).add_read(30u64);
        assert!(!txn.check_reads());
        assert!(txn.aborted());
    }

    #[test]
    fn test_abort_is_idempotent() {
        let events = log();
        let shared = Probe::new("a", &events);
        let mut txn = Transaction::new();
        txn.item(&shared, 1u64).add_write(1u64);
        txn.abort();
        txn.abort();
        assert!(txn.aborted());
        assert_eq!(txn.stats().snapshot().aborts, 1);
        assert!(!txn.try_commit(), "an aborted transaction cannot commit");
    }

    #[test]
    fn test_piece_commit_extracts_footprint() {
        let events = log();
        let shared = Probe::new("a", &events);
        let mut txn = Transaction::new();
        txn.read_item(&shared, 1u64).add_read(10u64);
        txn.item(&shared, 2u64).add_write(20u64);
        let footprint = txn.try_commit_piece().expect("commit succeeds");
        assert_eq!(footprint.read_keys, vec![Packed::Word(1)]);
        assert_eq!(footprint.write_keys, vec![Packed::Word(2)]);
        assert_eq!(footprint.write_values, vec![Packed::Word(20)]);
        assert_eq!(txn.item_count(), 0);
    }

    #[test]
    fn test_reset_clears_abort_state() {
        let events = log();
        let shared = Probe::failing("a", &events);
        let mut txn = Transaction::new();
        txn.item(&shared, 1u64).add_read(1u64).add_write(2u64);
        assert!(!txn.try_commit());
        txn.reset();
        assert!(!txn.aborted());
        assert!(txn.try_commit());
    }
}
