// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Pieces: the commit-published fragments of a chopped transaction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use crate::occ::CommitFootprint;

/// One committed-or-committing fragment of a chopped transaction.
///
/// Allocated at `start_piece` with the owner's generation captured, filled
/// with its footprint at piece commit, published in the owning rank slot,
/// and deferred-freed after the owning transaction ends. Observers that
/// find a piece in a rank slot decide what it means by comparing the
/// captured generation against the owner's current one: equal means the
/// owner is still executing this transaction instance; unequal means the
/// owner moved on (committed, or aborted if the `aborted` marker is set).
pub(crate) struct Piece {
    owner: usize,
    generation: u64,
    rank: u32,
    aborted: AtomicBool,
    footprint: OnceLock<CommitFootprint>,
}

impl Piece {
    pub(crate) fn new(owner: usize, generation: u64, rank: u32) -> Self {
        Self {
            owner,
            generation,
            rank,
            aborted: AtomicBool::new(false),
            footprint: OnceLock::new(),
        }
    }

    /// Thread id of the owning transaction.
    #[inline]
    pub(crate) fn owner(&self) -> usize {
        self.owner
    }

    /// Owner generation captured at `start_piece`.
    #[inline]
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Rank this piece executed at.
    #[inline]
    pub(crate) fn rank(&self) -> u32 {
        self.rank
    }

    /// Marks the piece aborted. Set under the owner's txn lock so
    /// observers holding that lock see a consistent abort marker.
    pub(crate) fn mark_aborted(&self) {
        self.aborted.store(true, Ordering::Release);
    }

    /// Returns true if the owning transaction aborted.
    #[inline]
    pub(crate) fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Stores the committed footprint. Called exactly once, before the
    /// piece is published.
    pub(crate) fn set_footprint(&self, footprint: CommitFootprint) {
        let stored = self.footprint.set(footprint).is_ok();
        assert!(stored, "piece footprint set twice");
    }

    fn footprint(&self) -> Option<&CommitFootprint> {
        self.footprint.get()
    }

    /// Key-overlap test against an already-published same-rank piece.
    ///
    /// Checks the three conflicting directions: this piece's reads against
    /// the published writes, writes against writes, and writes against the
    /// published reads. Keys compare by packed-handle equality, which is
    /// exact for inline-encoded keys; a Bloom filter could prefilter these
    /// scans, but correctness only requires no false negatives.
    pub(crate) fn conflicts_with(&self, published: &Piece) -> bool {
        let (Some(mine), Some(theirs)) = (self.footprint(), published.footprint()) else {
            return false;
        };

        // read-write
        for key in &mine.read_keys {
            if theirs.write_keys.contains(key) {
                return true;
            }
        }
        // write-write and write-read
        for key in &mine.write_keys {
            if theirs.write_keys.contains(key) || theirs.read_keys.contains(key) {
                return true;
            }
        }
        false
    }
}

impl std::fmt::Debug for Piece {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Piece")
            .field("owner", &self.owner)
            .field("generation", &self.generation)
            .field("rank", &self.rank)
            .field("aborted", &self.is_aborted())
            .finish()
    }
}
