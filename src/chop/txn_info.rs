// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Shared per-thread chop state.
//!
//! One `TxnInfo` per worker-thread slot, allocated at engine init and
//! reused by every transaction the thread runs. The generation counter is
//! what makes that reuse observable: it bumps on every commit and every
//! abort, so a dependency captured against generation `g` is live exactly
//! while the counter still reads `g`.
//!
//! `generation`, `should_abort` and `frontier` are atomics so the wait
//! loops in `start_piece`/`end_txn` can poll them without the txn lock;
//! all three only change in ways that are monotonic for a waiter within
//! one generation. Writes that must be consistent with the dependency
//! lists happen while holding `lock`.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use parking_lot::Mutex;

/// A dependency edge endpoint: the other transaction's thread slot plus
/// the generation it was running when the edge was added. A mismatch
/// between the captured and current generation means the edge is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Dep {
    pub(crate) thread: usize,
    pub(crate) generation: u64,
}

/// State guarded by the txn lock.
#[derive(Debug, Default)]
pub(crate) struct TxnSync {
    /// Transactions that depend on this one; drained by the abort cascade.
    pub(crate) backward: Vec<Dep>,
}

/// Shared chop state for one worker-thread slot.
#[derive(Debug)]
pub(crate) struct TxnInfo {
    generation: AtomicU64,
    should_abort: AtomicBool,
    /// Rank of the most recent piece this generation; -1 = none.
    frontier: AtomicI64,
    claimed: AtomicBool,
    pub(crate) lock: Mutex<TxnSync>,
}

impl TxnInfo {
    pub(crate) fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
            should_abort: AtomicBool::new(false),
            frontier: AtomicI64::new(-1),
            claimed: AtomicBool::new(false),
            lock: Mutex::new(TxnSync::default()),
        }
    }

    #[inline]
    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Bumps the generation. Callers hold `lock` so the bump is ordered
    /// with dependency-list changes and the abort cascade.
    pub(crate) fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    #[inline]
    pub(crate) fn should_abort(&self) -> bool {
        self.should_abort.load(Ordering::Acquire)
    }

    /// Raises the cascade signal. Callers hold `lock` and have checked the
    /// generation still matches the dependency they are cancelling.
    pub(crate) fn set_should_abort(&self) {
        self.should_abort.store(true, Ordering::Release);
    }

    pub(crate) fn clear_should_abort(&self) {
        self.should_abort.store(false, Ordering::Release);
    }

    /// Rank of the most recent piece this generation, if any.
    #[inline]
    pub(crate) fn frontier(&self) -> Option<u32> {
        let raw = self.frontier.load(Ordering::Acquire);
        (raw >= 0).then_some(raw as u32)
    }

    pub(crate) fn set_frontier(&self, rank: u32) {
        self.frontier.store(rank as i64, Ordering::Release);
    }

    pub(crate) fn clear_frontier(&self) {
        self.frontier.store(-1, Ordering::Release);
    }

    /// Claims this slot for a session. Returns false if already claimed.
    pub(crate) fn claim(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn release_claim(&self) {
        self.claimed.store(false, Ordering::Release);
    }
}
