// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Test fixture: a fixed-size array of versioned cells.
//!
//! The smallest realistic participant in the shared-object contract: each
//! cell carries a version word with a lock bit in bit 0 and the version in
//! the remaining bits. Transactional reads record the version as the read
//! stamp; commit locks the cell, re-checks the stamp, installs the value
//! and bumps the version.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::occ::{Shared, Transaction, TxnItem};

const LOCK_BIT: u64 = 1;

struct Cell {
    /// `version << 1 | lock`.
    state: AtomicU64,
    value: AtomicU64,
}

pub(crate) struct VersionedArray {
    cells: Vec<Cell>,
}

impl VersionedArray {
    pub(crate) fn new(len: usize) -> Arc<Self> {
        Arc::new(Self {
            cells: (0..len)
                .map(|_| Cell {
                    state: AtomicU64::new(0),
                    value: AtomicU64::new(0),
                })
                .collect(),
        })
    }

    fn as_shared(self: &Arc<Self>) -> Arc<dyn Shared> {
        Arc::clone(self) as Arc<dyn Shared>
    }

    /// Transactional read: records the cell version as the read stamp.
    pub(crate) fn read(self: &Arc<Self>, txn: &mut Transaction, index: usize) -> u64 {
        let shared = self.as_shared();
        if let Some(item) = txn.check_item(&shared, index as u64) {
            if item.has_write() {
                return item.write_value::<u64>().unwrap();
            }
        }
        let (version, value) = self.stable_read(index);
        txn.read_item(&shared, index as u64).add_read(version);
        value
    }

    /// Transactional write: buffered until piece/transaction commit.
    pub(crate) fn write(self: &Arc<Self>, txn: &mut Transaction, index: usize, value: u64) {
        let shared = self.as_shared();
        txn.item(&shared, index as u64).add_write(value);
    }

    /// Direct read, outside any transaction.
    pub(crate) fn get(&self, index: usize) -> u64 {
        self.cells[index].value.load(Ordering::Acquire)
    }

    /// Direct write, outside any transaction (serial replay).
    pub(crate) fn set(&self, index: usize, value: u64) {
        self.cells[index].value.store(value, Ordering::Release);
    }

    /// Reads `(version, value)` consistently, waiting out concurrent
    /// installers.
    fn stable_read(&self, index: usize) -> (u64, u64) {
        let cell = &self.cells[index];
        loop {
            let before = cell.state.load(Ordering::Acquire);
            if before & LOCK_BIT != 0 {
                std::thread::yield_now();
                continue;
            }
            let value = cell.value.load(Ordering::Acquire);
            if cell.state.load(Ordering::Acquire) == before {
                return (before >> 1, value);
            }
        }
    }

    fn cell(&self, item: &TxnItem) -> &Cell {
        let index = item.key::<u64>().unwrap() as usize;
        &self.cells[index]
    }
}

impl Shared for VersionedArray {
    fn lock(&self, item: &mut TxnItem) {
        let cell = self.cell(item);
        loop {
            let state = cell.state.load(Ordering::Acquire);
            if state & LOCK_BIT == 0
                && cell
                    .state
                    .compare_exchange(state, state | LOCK_BIT, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                return;
            }
            std::thread::yield_now();
        }
    }

    fn check(&self, item: &TxnItem, _txn: &Transaction) -> bool {
        let cell = self.cell(item);
        let state = cell.state.load(Ordering::Acquire);
        // A cell locked by someone else fails conservatively; our own
        // write lock shows through the item's write flag.
        if state & LOCK_BIT != 0 && !item.has_write() {
            return false;
        }
        item.read_value::<u64>() == Some(state >> 1)
    }

    fn install(&self, item: &mut TxnItem) {
        let cell = self.cell(item);
        cell.value.store(item.write_value::<u64>().unwrap(), Ordering::Release);
        // Bump the version, keeping the lock bit set.
        cell.state.fetch_add(2, Ordering::AcqRel);
    }

    fn unlock(&self, item: &mut TxnItem) {
        self.cell(item).state.fetch_and(!LOCK_BIT, Ordering::AcqRel);
    }

    fn cleanup(&self, _item: &mut TxnItem, _committed: bool) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transactional_read_write() {
        let array = VersionedArray::new(4);
        let mut txn = Transaction::new();
        assert_eq!(array.read(&mut txn, 0), 0);
        array.write(&mut txn, 0, 7);
        // Read-your-writes before commit.
        assert_eq!(array.read(&mut txn, 0), 7);
        assert!(txn.try_commit());
        assert_eq!(array.get(0), 7);
    }

    #[test]
    fn test_conflicting_read_aborts() {
        let array = VersionedArray::new(2);
        let mut reader = Transaction::new();
        let seen = array.read(&mut reader, 0);
        assert_eq!(seen, 0);
        // Make the read participate in commit validation.
        array.write(&mut reader, 1, 1);

        let mut writer = Transaction::new();
        array.write(&mut writer, 0, 9);
        assert!(writer.try_commit());

        assert!(!reader.try_commit(), "stamp moved, reader must abort");
        assert!(reader.aborted());
        assert_eq!(array.get(1), 0, "aborted writes are not installed");
    }

    #[test]
    fn test_version_bumps_on_install() {
        let array = VersionedArray::new(1);
        let (v0, _) = array.stable_read(0);
        let mut txn = Transaction::new();
        array.write(&mut txn, 0, 1);
        assert!(txn.try_commit());
        let (v1, _) = array.stable_read(0);
        assert_eq!(v1, v0 + 1);
    }
}
