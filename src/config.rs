// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Engine configuration.

use std::time::Duration;

/// Default number of worker-thread slots.
pub const DEFAULT_MAX_THREADS: usize = 16;

/// Default bound on piece ranks.
pub const DEFAULT_MAX_RANKS: u32 = 128;

/// Default pre-allocated capacity of a transaction's item set.
pub const DEFAULT_ITEM_CAPACITY: usize = 512;

/// Default period of the background epoch advancer.
pub const DEFAULT_EPOCH_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Default number of epochs a deferred callback must age before it runs.
pub const DEFAULT_RECLAIM_LAG: u64 = 2;

/// Configuration for [`ChopEngine`](crate::ChopEngine) initialization.
///
/// All tables are sized once at engine construction; none of these values
/// can change afterwards.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of worker-thread slots. Thread ids are `0..max_threads`.
    pub max_threads: usize,
    /// Exclusive upper bound on piece ranks.
    pub max_ranks: u32,
    /// Initial capacity of each transaction's item set.
    pub initial_item_capacity: usize,
    /// Period of the background epoch advancer.
    pub epoch_tick_interval: Duration,
    /// Epochs a deferred-free callback must age before it is run.
    pub reclaim_lag: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_threads: DEFAULT_MAX_THREADS,
            max_ranks: DEFAULT_MAX_RANKS,
            initial_item_capacity: DEFAULT_ITEM_CAPACITY,
            epoch_tick_interval: DEFAULT_EPOCH_TICK_INTERVAL,
            reclaim_lag: DEFAULT_RECLAIM_LAG,
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of worker-thread slots.
    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    /// Sets the exclusive upper bound on piece ranks.
    pub fn with_max_ranks(mut self, max_ranks: u32) -> Self {
        self.max_ranks = max_ranks;
        self
    }

    /// Sets the initial item-set capacity.
    pub fn with_initial_item_capacity(mut self, capacity: usize) -> Self {
        self.initial_item_capacity = capacity;
        self
    }

    /// Sets the epoch advancer period.
    pub fn with_epoch_tick_interval(mut self, interval: Duration) -> Self {
        self.epoch_tick_interval = interval;
        self
    }

    /// Sets the deferred-reclamation lag in epochs.
    pub fn with_reclaim_lag(mut self, lag: u64) -> Self {
        self.reclaim_lag = lag;
        self
    }
}
