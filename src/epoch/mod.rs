// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Epoch-based deferred reclamation.
//!
//! Shared objects published to other threads (pieces and their packed key
//! arrays) cannot be freed the moment their owner is done with them: a
//! concurrent reader may still hold a reference it obtained under a rank
//! lock. Instead, owners enqueue a destructor with [`EpochReclaimer::defer`]
//! and the reclaimer runs it once every thread active at enqueue time has
//! observed a newer epoch.
//!
//! The scheme is the classic two-epoch hazard window:
//! - every worker records the global epoch when it starts a transaction;
//! - [`EpochReclaimer::tick`] advances the global epoch past the minimum
//!   epoch any active worker still holds;
//! - a deferred callback runs once the global epoch is at least
//!   `reclaim_lag` (default 2) ahead of the epoch it was enqueued at.

mod reclaimer;

pub use reclaimer::{EpochAdvancer, EpochReclaimer};
