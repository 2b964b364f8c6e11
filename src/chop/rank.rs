// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! The rank table: per-rank publication slots and rank locks.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use super::piece::Piece;

/// Per-rank slot array: one cell per worker thread, holding the thread's
/// most recent piece at this rank.
pub(crate) type SlotArray = Box<[Option<Arc<Piece>>]>;

/// One rank's slots plus the rank lock.
///
/// The mutex is the rank lock of the protocol: a committing piece holds it
/// from the end of `start_piece` through publication, which serializes
/// same-rank commit-time conflict checking. Slot reads and writes only
/// ever happen under it.
pub(crate) struct RankInfo {
    slots: Mutex<SlotArray>,
}

impl RankInfo {
    fn new(max_threads: usize) -> Self {
        Self {
            slots: Mutex::new((0..max_threads).map(|_| None).collect()),
        }
    }

    /// Takes the rank lock, yielding the slot array.
    pub(crate) fn lock(&self) -> MutexGuard<'_, SlotArray> {
        self.slots.lock()
    }
}

/// All rank slots, sized at engine init.
pub(crate) struct RankTable {
    ranks: Box<[RankInfo]>,
}

impl RankTable {
    pub(crate) fn new(max_ranks: u32, max_threads: usize) -> Self {
        Self {
            ranks: (0..max_ranks).map(|_| RankInfo::new(max_threads)).collect(),
        }
    }

    #[inline]
    pub(crate) fn rank(&self, rank: u32) -> &RankInfo {
        &self.ranks[rank as usize]
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.ranks.len()
    }
}

impl std::fmt::Debug for RankTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RankTable").field("ranks", &self.ranks.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_start_empty() {
        let table = RankTable::new(4, 3);
        assert_eq!(table.len(), 4);
        for rank in 0..4 {
            let slots = table.rank(rank).lock();
            assert_eq!(slots.len(), 3);
            assert!(slots.iter().all(Option::is_none));
        }
    }

    #[test]
    fn test_publish_and_clear() {
        let table = RankTable::new(2, 2);
        let piece = Arc::new(Piece::new(1, 0, 0));
        {
            let mut slots = table.rank(0).lock();
            slots[1] = Some(Arc::clone(&piece));
        }
        {
            let slots = table.rank(0).lock();
            assert!(slots[1].is_some());
            assert!(slots[0].is_none());
        }
        {
            let mut slots = table.rank(0).lock();
            slots[1] = None;
        }
        assert!(table.rank(0).lock()[1].is_none());
    }
}
