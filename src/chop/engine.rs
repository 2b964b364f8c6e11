// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! The chop engine: process-wide tables with an explicit lifecycle.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use tracing::debug;

use crate::config::EngineConfig;
use crate::epoch::{EpochAdvancer, EpochReclaimer};
use crate::occ::Transaction;
use crate::stats::{StatsRegistry, StatsSnapshot};

use super::error::ChopError;
use super::rank::RankTable;
use super::session::ThreadSession;
use super::txn_info::TxnInfo;

/// The chopped-transaction engine.
///
/// Owns everything shared between workers: the per-thread transaction
/// slots, the rank table, the epoch reclaimer and the counter registry.
/// All tables are sized once at construction. Workers participate through
/// [`session`](Self::session), one live session per thread id.
pub struct ChopEngine {
    pub(crate) config: EngineConfig,
    pub(crate) txns: Box<[TxnInfo]>,
    pub(crate) ranks: RankTable,
    pub(crate) reclaimer: Arc<EpochReclaimer>,
    pub(crate) commit_seq: AtomicU64,
    stats: StatsRegistry,
}

impl ChopEngine {
    /// Initializes an engine from `config`.
    pub fn new(config: EngineConfig) -> Self {
        debug!(
            max_threads = config.max_threads,
            max_ranks = config.max_ranks,
            "chop engine initialized"
        );
        Self {
            txns: (0..config.max_threads).map(|_| TxnInfo::new()).collect(),
            ranks: RankTable::new(config.max_ranks, config.max_threads),
            reclaimer: Arc::new(EpochReclaimer::new(config.max_threads, config.reclaim_lag)),
            commit_seq: AtomicU64::new(0),
            stats: StatsRegistry::new(config.max_threads),
            config,
        }
    }

    /// Initializes an engine with the default configuration.
    pub fn with_defaults() -> Self {
        Self::new(EngineConfig::default())
    }

    /// The configuration this engine was built with.
    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Claims worker slot `tid` and returns its session.
    ///
    /// Each worker sets its thread id exactly once this way, before any
    /// transaction call. Fails if the id is out of range or a live session
    /// already owns it; the claim is released when the session drops.
    pub fn session(&self, tid: usize) -> Result<ThreadSession<'_>, ChopError> {
        if tid >= self.config.max_threads {
            return Err(ChopError::ThreadIdOutOfRange {
                tid,
                max: self.config.max_threads,
            });
        }
        if !self.txns[tid].claim() {
            return Err(ChopError::ThreadIdClaimed(tid));
        }
        self.reclaimer.enter(tid);
        let txn = Transaction::with_stats(self.config.initial_item_capacity, self.stats.thread(tid));
        Ok(ThreadSession::new(self, tid, txn))
    }

    /// Read-only merged view of the engine counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// The engine's epoch reclaimer, for manual ticking in embedders that
    /// do not run the background advancer.
    #[inline]
    pub fn reclaimer(&self) -> &Arc<EpochReclaimer> {
        &self.reclaimer
    }

    /// Spawns the background epoch advancer at the configured interval.
    pub fn spawn_epoch_advancer(&self) -> EpochAdvancer {
        self.reclaimer.spawn_advancer(self.config.epoch_tick_interval)
    }

    #[cfg(test)]
    pub(crate) fn backward_deps(&self, tid: usize) -> Vec<(usize, u64)> {
        self.txns[tid]
            .lock
            .lock()
            .backward
            .iter()
            .map(|d| (d.thread, d.generation))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn generation(&self, tid: usize) -> u64 {
        self.txns[tid].generation()
    }

    #[cfg(test)]
    pub(crate) fn rank_slot_set(&self, rank: u32, tid: usize) -> bool {
        self.ranks.rank(rank).lock()[tid].is_some()
    }
}

impl std::fmt::Debug for ChopEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChopEngine")
            .field("max_threads", &self.config.max_threads)
            .field("max_ranks", &self.ranks.len())
            .finish()
    }
}
