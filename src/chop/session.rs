// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! The chopping coordinator: per-worker sessions driving chopped
//! transactions through the rank-ordered piece protocol.
//!
//! A session binds one worker thread to its engine slot. Within a
//! transaction the worker alternates `start_piece(rank)` (ranks strictly
//! increasing), user work against shared objects, and `try_commit_piece`,
//! then finishes with `end_txn`. Piece commits publish read/write
//! footprints in the rank table; a later same-rank committer that overlaps
//! an earlier piece registers a dependency and must not finish before the
//! earlier transaction does. Aborts cascade backwards along those edges.
//!
//! Only `start_piece` and `end_txn` ever block, and both block by
//! cooperative yielding so a cascaded abort can cut the wait short.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::MutexGuard;
use tracing::{debug, trace};

use crate::occ::Transaction;

use super::engine::ChopEngine;
use super::error::ChopError;
use super::piece::Piece;
use super::rank::SlotArray;
use super::txn_info::Dep;

/// A forward dependency held by this session's transaction.
///
/// `stale` is set once the target's generation is observed to have moved
/// past the captured one; a stale dependency is never waited on again.
#[derive(Debug, Clone, Copy)]
struct ForwardDep {
    thread: usize,
    generation: u64,
    stale: bool,
}

/// How long a dependency wait must hold.
#[derive(Clone, Copy)]
enum WaitUntil {
    /// Until the target has moved strictly past this rank (or finished).
    PastRank(u32),
    /// Until the target has finished its transaction.
    Finished,
}

/// The piece currently executing, together with the rank lock that
/// serializes its whole commit sequence.
struct ActivePiece<'e> {
    piece: Arc<Piece>,
    guard: MutexGuard<'e, SlotArray>,
}

/// A worker thread's handle on the chop engine.
///
/// Holds the thread's OCC transaction and everything thread-owned about
/// the chop protocol (committed pieces, forward dependencies, the active
/// piece and its rank lock). Created with [`ChopEngine::session`]; the
/// thread-id claim and epoch pin are released on drop, and a transaction
/// still open at drop is aborted.
pub struct ThreadSession<'e> {
    engine: &'e ChopEngine,
    tid: usize,
    txn: Transaction,
    pieces: Vec<Arc<Piece>>,
    active: Option<ActivePiece<'e>>,
    forward: Vec<ForwardDep>,
    last_rank: Option<u32>,
    in_txn: bool,
    last_commit_seq: Option<u64>,
}

impl<'e> ThreadSession<'e> {
    pub(crate) fn new(engine: &'e ChopEngine, tid: usize, txn: Transaction) -> Self {
        Self {
            engine,
            tid,
            txn,
            pieces: Vec::new(),
            active: None,
            forward: Vec::new(),
            last_rank: None,
            in_txn: false,
            last_commit_seq: None,
        }
    }

    /// This session's thread id.
    #[inline]
    pub fn tid(&self) -> usize {
        self.tid
    }

    /// The underlying OCC transaction, for issuing reads and writes
    /// against shared objects.
    #[inline]
    pub fn txn(&mut self) -> &mut Transaction {
        &mut self.txn
    }

    /// Commit sequence number of the most recent `end_txn`, if any.
    ///
    /// Sequence order is consistent with the dependency order, so a serial
    /// replay of committed transactions in sequence order reproduces the
    /// concurrent outcome.
    #[inline]
    pub fn last_commit_seq(&self) -> Option<u64> {
        self.last_commit_seq
    }

    /// Begins a fresh chopped transaction.
    pub fn start_txn(&mut self) {
        assert!(self.active.is_none(), "start_txn while a piece is active");
        assert!(self.pieces.is_empty(), "start_txn while a transaction is open");
        self.engine.reclaimer.enter(self.tid);
        self.txn.reset();
        self.last_rank = None;
        self.in_txn = true;
    }

    /// Begins a piece at `rank`.
    ///
    /// Ranks within one transaction must be strictly increasing and below
    /// the configured bound; violations are contract errors and panic.
    /// Blocks (cooperatively) until every live forward dependency has
    /// moved strictly past `rank`, then takes the rank lock. Returns
    /// `ChopError::Aborted` if a cascaded abort was observed, in which
    /// case the transaction has already been unwound.
    pub fn start_piece(&mut self, rank: u32) -> Result<(), ChopError> {
        assert!(self.in_txn, "start_piece outside a transaction");
        assert!(self.active.is_none(), "start_piece while a piece is active");
        assert!(
            rank < self.engine.config.max_ranks,
            "rank {rank} out of range 0..{}",
            self.engine.config.max_ranks
        );
        if let Some(last) = self.last_rank {
            assert!(rank > last, "piece ranks must strictly increase: {rank} after {last}");
        }
        self.last_rank = Some(rank);

        let engine = self.engine;
        let info = &engine.txns[self.tid];
        let piece = Arc::new(Piece::new(self.tid, info.generation(), rank));
        info.set_frontier(rank);

        self.wait_for_deps(WaitUntil::PastRank(rank));

        if info.should_abort() {
            trace!(tid = self.tid, rank, "abort observed entering piece");
            self.do_abort();
            return Err(ChopError::Aborted);
        }

        let guard = engine.ranks.rank(rank).lock();
        self.active = Some(ActivePiece { piece, guard });
        Ok(())
    }

    /// Commits the active piece.
    ///
    /// Runs the OCC commit over the items accumulated since the piece
    /// started. On success, publishes the piece's footprint in its rank
    /// slot after registering dependencies against every overlapping
    /// same-rank piece, and returns true. On validation failure (or on a
    /// conservative abort against a concurrently aborting overlapper) the
    /// whole transaction aborts and the method returns false.
    pub fn try_commit_piece(&mut self) -> bool {
        assert!(self.in_txn, "try_commit_piece outside a transaction");
        let Some(ActivePiece { piece, mut guard }) = self.active.take() else {
            panic!("try_commit_piece without an active piece");
        };

        let footprint = match self.txn.try_commit_piece() {
            Some(footprint) => footprint,
            None => {
                drop(guard);
                debug!(tid = self.tid, rank = piece.rank(), "piece failed validation");
                self.do_abort();
                return false;
            }
        };
        piece.set_footprint(footprint);

        // Same-rank conflict discovery: every other thread's slot at this
        // rank, each owner examined under its txn lock so the owner can
        // neither abort nor see new dependents halfway through.
        let engine = self.engine;
        let mut conservative_abort = false;
        for other in 0..engine.config.max_threads {
            if other == self.tid {
                continue;
            }
            let Some(published) = guard[other].as_ref().map(Arc::clone) else {
                continue;
            };
            let owner = &engine.txns[published.owner()];
            let mut sync = owner.lock.lock();
            if piece.conflicts_with(&published) {
                if published.is_aborted() {
                    // The owner aborted (or is aborting) with the piece
                    // still slotted; we may have observed its writes.
                    drop(sync);
                    conservative_abort = true;
                    break;
                }
                if owner.generation() == published.generation() {
                    sync.backward.push(Dep {
                        thread: self.tid,
                        generation: piece.generation(),
                    });
                    self.forward.push(ForwardDep {
                        thread: published.owner(),
                        generation: published.generation(),
                        stale: false,
                    });
                    trace!(
                        tid = self.tid,
                        on = published.owner(),
                        rank = piece.rank(),
                        "dependency added"
                    );
                }
                // Generation moved on without the abort marker: the owner
                // committed, nothing to depend on.
            }
            drop(sync);
        }

        if conservative_abort {
            drop(guard);
            debug!(tid = self.tid, rank = piece.rank(), "conservative abort on aborted overlap");
            self.do_abort();
            return false;
        }

        guard[self.tid] = Some(Arc::clone(&piece));
        drop(guard);
        self.pieces.push(piece);
        true
    }

    /// Commits the active piece, surfacing failure as an error.
    pub fn commit_piece(&mut self) -> Result<(), ChopError> {
        if self.try_commit_piece() {
            Ok(())
        } else {
            Err(ChopError::Aborted)
        }
    }

    /// Finishes the transaction.
    ///
    /// Waits (cooperatively) for every live forward dependency to finish,
    /// then commits: bumps the generation, clears dependency state,
    /// releases this thread's rank slots and defers the pieces to the
    /// epoch reclaimer. Returns the commit sequence number, or
    /// `ChopError::Aborted` if a cascaded abort arrived first.
    pub fn end_txn(&mut self) -> Result<u64, ChopError> {
        assert!(self.in_txn, "end_txn outside a transaction");
        assert!(self.active.is_none(), "end_txn with an uncommitted piece");

        self.wait_for_deps(WaitUntil::Finished);

        let info = &self.engine.txns[self.tid];
        if info.should_abort() {
            trace!(tid = self.tid, "abort observed at end_txn");
            self.do_abort();
            return Err(ChopError::Aborted);
        }

        let seq;
        {
            let mut sync = info.lock.lock();
            // The sequence draw is ordered with the generation bump, so
            // dependents that outwait us always draw later numbers.
            seq = self.engine.commit_seq.fetch_add(1, Ordering::SeqCst);
            info.bump_generation();
            sync.backward.clear();
        }
        self.finish_txn();
        self.last_commit_seq = Some(seq);
        Ok(seq)
    }

    /// Voluntarily aborts the transaction, cascading to dependents.
    pub fn abort_txn(&mut self) {
        assert!(self.in_txn, "abort_txn outside a transaction");
        self.do_abort();
    }

    /// Yield-waits on every live forward dependency.
    ///
    /// A dependency stops being waited on as soon as its target's
    /// generation moves (the dependency is stale), its frontier satisfies
    /// `until`, or our own abort signal arrives.
    fn wait_for_deps(&mut self, until: WaitUntil) {
        let engine = self.engine;
        let own = &engine.txns[self.tid];
        for dep in self.forward.iter_mut() {
            if dep.stale {
                continue;
            }
            let target = &engine.txns[dep.thread];
            loop {
                if own.should_abort() {
                    return;
                }
                if target.generation() != dep.generation {
                    dep.stale = true;
                    break;
                }
                let blocked = match (until, target.frontier()) {
                    (_, None) => false,
                    (WaitUntil::PastRank(rank), Some(frontier)) => frontier <= rank,
                    (WaitUntil::Finished, Some(_)) => true,
                };
                if !blocked {
                    break;
                }
                std::thread::yield_now();
            }
        }
    }

    /// The abort protocol: unwind the piece in flight, mark published
    /// pieces aborted, cascade to dependents, bump the generation, then
    /// release slots and defer reclamation.
    fn do_abort(&mut self) {
        // Release the rank lock first if a piece is mid-flight; the piece
        // itself was never published, so dropping it is enough.
        self.active = None;
        self.txn.abort();

        let engine = self.engine;
        let info = &engine.txns[self.tid];
        let dependents = {
            let mut sync = info.lock.lock();
            for piece in &self.pieces {
                piece.mark_aborted();
            }
            std::mem::take(&mut sync.backward)
        };

        // Cascade before the generation bump: a waiter whose loop exits on
        // the bump must already be able to observe its abort signal. A
        // committer that wins the race to our lock instead sees the
        // aborted piece markers and conservatively aborts itself.
        for dep in &dependents {
            let target = &engine.txns[dep.thread];
            let _sync = target.lock.lock();
            if target.generation() == dep.generation {
                target.set_should_abort();
                trace!(tid = self.tid, to = dep.thread, "cascading abort");
            }
        }

        {
            let _sync = info.lock.lock();
            info.bump_generation();
        }

        debug!(tid = self.tid, dependents = dependents.len(), "transaction aborted");
        self.finish_txn();
    }

    /// Cleanup shared by commit and abort: clear the frontier and the
    /// dependency lists, vacate this thread's rank slots and hand the
    /// pieces to the epoch reclaimer.
    fn finish_txn(&mut self) {
        let engine = self.engine;
        let info = &engine.txns[self.tid];
        info.clear_frontier();
        self.forward.clear();
        self.last_rank = None;
        for piece in self.pieces.drain(..) {
            {
                let mut slots = engine.ranks.rank(piece.rank()).lock();
                slots[self.tid] = None;
            }
            engine.reclaimer.defer(self.tid, Box::new(move || drop(piece)));
        }
        info.clear_should_abort();
        self.in_txn = false;
    }

    #[cfg(test)]
    pub(crate) fn forward_deps(&self) -> Vec<(usize, u64, bool)> {
        self.forward.iter().map(|d| (d.thread, d.generation, d.stale)).collect()
    }

    #[cfg(test)]
    pub(crate) fn piece_ranks(&self) -> Vec<u32> {
        self.pieces.iter().map(|p| p.rank()).collect()
    }
}

impl Drop for ThreadSession<'_> {
    fn drop(&mut self) {
        if self.in_txn {
            self.do_abort();
        }
        self.engine.reclaimer.exit(self.tid);
        self.engine.txns[self.tid].release_claim();
    }
}

impl std::fmt::Debug for ThreadSession<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadSession")
            .field("tid", &self.tid)
            .field("in_txn", &self.in_txn)
            .field("pieces", &self.pieces.len())
            .field("forward_deps", &self.forward.len())
            .finish()
    }
}
