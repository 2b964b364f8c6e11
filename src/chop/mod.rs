// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Transaction chopping: rank-ordered pieces over the OCC engine.
//!
//! A chopped transaction runs as a sequence of *pieces*, each executed at
//! a caller-assigned rank (strictly increasing within the transaction) and
//! commit-published on its own as soon as its piece commit succeeds. The
//! whole transaction still reads as one serializable unit:
//!
//! - same-rank pieces are serialized by a per-rank lock, and the committer
//!   compares its read/write footprint against every other thread's
//!   published piece at that rank;
//! - an overlap registers a *forward* dependency (this transaction must
//!   outlive that one) and the mirror *backward* edge (used to cascade
//!   aborts), both captured with the target's generation so stale edges
//!   are detectable;
//! - `start_piece` and `end_txn` are the only blocking points: they wait,
//!   by cooperative yield, until every live forward dependency has moved
//!   past the rank (respectively: finished), and they are where a
//!   cascaded abort is observed;
//! - dependencies always point from a later committer to an earlier one at
//!   the same rank, and a dependent can never overtake its dependency at
//!   any later rank, so the wait graph stays acyclic and the protocol
//!   deadlock-free.
//!
//! Aborts are per-transaction: every published piece is marked, every
//! dependent whose generation still matches is signalled, and the
//! generation bump retires the pieces for epoch-deferred reclamation.

mod engine;
mod error;
mod piece;
mod rank;
mod session;
mod txn_info;

pub use engine::ChopEngine;
pub use error::ChopError;
pub use session::ThreadSession;
