// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! The shared-object contract.

use std::sync::Arc;

use super::item::TxnItem;
use super::transaction::Transaction;

/// Interface a data structure implements to participate in transactions.
///
/// The engine drives every write-item through `lock`, `install` and
/// `unlock` at commit time, validates every read-item through `check`, and
/// hands every item to `cleanup` once the commit verdict is known. The
/// item carries an opaque key and optional read/write payloads of the
/// implementation's own shape; the engine never inspects them.
///
/// Contract:
/// - `lock` takes an exclusive lock on the item's logical key. It is only
///   ever called in the engine's canonical item order, so implementations
///   need no deadlock avoidance of their own.
/// - `check` returns true iff the read stamp recorded in the item still
///   describes the current state. Called with no guarantee the item's key
///   is locked by this transaction unless the item also carries a write.
/// - `install` applies the pending write; called only under `lock`.
/// - `unlock` releases what `lock` took.
/// - `cleanup` runs for every item of the transaction, committed or not;
///   `committed` tells the implementation which.
///
/// Implementations are shared across threads as `Arc<dyn Shared>`; the
/// engine identifies them by pointer identity and never downcasts.
pub trait Shared: Send + Sync {
    /// Takes the commit-time lock for this item's key.
    fn lock(&self, item: &mut TxnItem);

    /// Validates the item's recorded read against current state.
    fn check(&self, item: &TxnItem, txn: &Transaction) -> bool;

    /// Applies the item's pending write. Called under the item lock.
    fn install(&self, item: &mut TxnItem);

    /// Releases the commit-time lock.
    fn unlock(&self, item: &mut TxnItem);

    /// Post-commit or post-abort hook; runs for every item.
    fn cleanup(&self, item: &mut TxnItem, committed: bool);
}

/// Stable identity of a shared object, used for item lookup and the
/// canonical commit ordering.
#[inline]
pub(crate) fn shared_id(shared: &Arc<dyn Shared>) -> usize {
    Arc::as_ptr(shared) as *const () as usize
}
