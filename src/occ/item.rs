// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Transaction items and the handle API over them.
//!
//! A [`TxnItem`] is one `(shared object, key)` entry in a transaction's
//! item set, carrying the optional read stamp and pending write for that
//! key. User code and shared-object implementations manipulate items
//! through [`ItemProxy`], which borrows the owning transaction so reads
//! and writes land in its buffer.

use std::sync::Arc;

use super::buffer::{Packable, Packed};
use super::shared::{shared_id, Shared};
use super::transaction::Transaction;

/// One entry of a transaction's item set.
pub struct TxnItem {
    pub(crate) shared: Arc<dyn Shared>,
    pub(crate) key: Packed,
    pub(crate) rdata: Option<Packed>,
    pub(crate) wdata: Option<Packed>,
    pub(crate) flags: u32,
}

impl TxnItem {
    pub(crate) fn new(shared: Arc<dyn Shared>, key: Packed) -> Self {
        Self {
            shared,
            key,
            rdata: None,
            wdata: None,
            flags: 0,
        }
    }

    /// Returns the typed key, if it unpacks as `T`.
    #[inline]
    pub fn key<T: Packable>(&self) -> Option<T> {
        T::unpack(&self.key)
    }

    /// Returns the raw key handle.
    #[inline]
    pub fn key_packed(&self) -> &Packed {
        &self.key
    }

    /// Returns true if a read stamp was recorded.
    #[inline]
    pub fn has_read(&self) -> bool {
        self.rdata.is_some()
    }

    /// Returns true if a write is pending.
    #[inline]
    pub fn has_write(&self) -> bool {
        self.wdata.is_some()
    }

    /// Returns the recorded read stamp, if it unpacks as `T`.
    #[inline]
    pub fn read_value<T: Packable>(&self) -> Option<T> {
        self.rdata.as_ref().and_then(T::unpack)
    }

    /// Returns the pending write value, if it unpacks as `T`.
    #[inline]
    pub fn write_value<T: Packable>(&self) -> Option<T> {
        self.wdata.as_ref().and_then(T::unpack)
    }

    /// Caller-defined flags (the original uses them as a size tag).
    #[inline]
    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// Sets the caller-defined flags.
    #[inline]
    pub fn set_flags(&mut self, flags: u32) {
        self.flags = flags;
    }

    /// True if `other` names the same logical entry.
    #[inline]
    pub(crate) fn same_entry(&self, other: &TxnItem) -> bool {
        shared_id(&self.shared) == shared_id(&other.shared) && self.key == other.key
    }

    /// Canonical cross-transaction ordering: shared-object identity first,
    /// then key. Locking in this order prevents lock cycles between
    /// committing transactions.
    #[inline]
    pub(crate) fn canonical_key(&self) -> (usize, &Packed) {
        (shared_id(&self.shared), &self.key)
    }
}

impl std::fmt::Debug for TxnItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxnItem")
            .field("shared", &shared_id(&self.shared))
            .field("key", &self.key)
            .field("read", &self.has_read())
            .field("write", &self.has_write())
            .field("flags", &self.flags)
            .finish()
    }
}

/// Mutable handle to one item of a transaction.
///
/// Returned by [`Transaction::item`], [`Transaction::read_item`] and
/// [`Transaction::check_item`]. Mutators consume and return the proxy so
/// calls chain the way the original's proxies do:
/// `txn.item(&shared, key).add_write(v).set_flags(8)`.
pub struct ItemProxy<'t> {
    pub(crate) txn: &'t mut Transaction,
    pub(crate) index: usize,
}

impl<'t> ItemProxy<'t> {
    /// Position of this item in the set (insertion order).
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Records a read stamp, unless one is already recorded.
    pub fn add_read<T: Packable>(self, stamp: T) -> Self {
        if !self.txn.items[self.index].has_read() {
            let packed = self.txn.buf.pack(stamp);
            self.txn.items[self.index].rdata = Some(packed);
        }
        self
    }

    /// Replaces the read stamp with `new` if the current stamp equals
    /// `old`. A no-op when no read is recorded or the stamp moved on.
    pub fn update_read<T: Packable + PartialEq>(self, old: T, new: T) -> Self {
        if self.txn.items[self.index].read_value::<T>() == Some(old) {
            let packed = self.txn.buf.pack(new);
            self.txn.items[self.index].rdata = Some(packed);
        }
        self
    }

    /// Records a pending write, overwriting any earlier write to the same
    /// item. The first write marks the item into the commit write-subset.
    pub fn add_write<T: Packable>(self, value: T) -> Self {
        let packed = self.txn.buf.pack(value);
        let fresh = !self.txn.items[self.index].has_write();
        self.txn.items[self.index].wdata = Some(packed);
        if fresh {
            self.txn.mark_write(self.index);
        }
        self
    }

    /// Sets the caller-defined flags.
    pub fn set_flags(self, flags: u32) -> Self {
        self.txn.items[self.index].flags = flags;
        self
    }

    /// Returns true if a read stamp was recorded.
    #[inline]
    pub fn has_read(&self) -> bool {
        self.txn.items[self.index].has_read()
    }

    /// Returns true if a write is pending.
    #[inline]
    pub fn has_write(&self) -> bool {
        self.txn.items[self.index].has_write()
    }

    /// Returns the recorded read stamp.
    #[inline]
    pub fn read_value<T: Packable>(&self) -> Option<T> {
        self.txn.items[self.index].read_value()
    }

    /// Returns the pending write value.
    #[inline]
    pub fn write_value<T: Packable>(&self) -> Option<T> {
        self.txn.items[self.index].write_value()
    }

    /// Returns the typed key.
    #[inline]
    pub fn key<T: Packable>(&self) -> Option<T> {
        self.txn.items[self.index].key()
    }

    /// Returns the caller-defined flags.
    #[inline]
    pub fn flags(&self) -> u32 {
        self.txn.items[self.index].flags()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::occ::transaction::Transaction;

    struct Inert;

    impl Shared for Inert {
        fn lock(&self, _item: &mut TxnItem) {}
        fn check(&self, _item: &TxnItem, _txn: &Transaction) -> bool {
            true
        }
        fn install(&self, _item: &mut TxnItem) {}
        fn unlock(&self, _item: &mut TxnItem) {}
        fn cleanup(&self, _item: &mut TxnItem, _committed: bool) {}
    }

    fn shared() -> Arc<dyn Shared> {
        Arc::new(Inert)
    }

    #[test]
    fn test_add_read_keeps_first_stamp() {
        let shared = shared();
        let mut txn = Transaction::new();
        txn.item(&shared, 1u64).add_read(10u64).add_read(20u64);
        let item = txn.check_item(&shared, 1u64).unwrap();
        assert_eq!(item.read_value::<u64>(), Some(10));
    }

    #[test]
    fn test_update_read_matches_old_stamp() {
        let shared = shared();
        let mut txn = Transaction::new();
        txn.item(&shared, 1u64).add_read(10u64).update_read(10u64, 11u64);
        assert_eq!(txn.check_item(&shared, 1u64).unwrap().read_value::<u64>(), Some(11));

        txn.item(&shared, 1u64).update_read(99u64, 42u64);
        assert_eq!(txn.check_item(&shared, 1u64).unwrap().read_value::<u64>(), Some(11));
    }

    #[test]
    fn test_add_write_overwrites() {
        let shared = shared();
        let mut txn = Transaction::new();
        txn.item(&shared, 2u64).add_write(5u64);
        txn.item(&shared, 2u64).add_write(6u64);
        let item = txn.check_item(&shared, 2u64).unwrap();
        assert!(item.has_write());
        assert_eq!(item.write_value::<u64>(), Some(6));
    }

    #[test]
    fn test_flags_roundtrip() {
        let shared = shared();
        let mut txn = Transaction::new();
        txn.item(&shared, 3u64).add_write(1u64).set_flags(8);
        assert_eq!(txn.check_item(&shared, 3u64).unwrap().flags(), 8);
    }

    #[test]
    fn test_typed_key() {
        let shared = shared();
        let mut txn = Transaction::new();
        let proxy = txn.item(&shared, 7usize);
        assert_eq!(proxy.key::<usize>(), Some(7));
    }
}
