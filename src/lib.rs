// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! chopstm: an optimistic software transactional memory engine with transaction chopping
//!
//! This crate provides the core components for running composite transactions as
//! rank-ordered pieces, each piece commit-visible as soon as it is safe, while
//! preserving a serializable outcome for the whole transaction.

pub mod chop;
pub mod config;
pub mod epoch;
pub mod occ;
pub mod stats;

#[cfg(test)]
pub(crate) mod testutil;

pub use chop::{ChopEngine, ChopError, ThreadSession};
pub use config::EngineConfig;
pub use epoch::{EpochAdvancer, EpochReclaimer};
pub use occ::{ItemProxy, Packable, Packed, PackedObject, Shared, Transaction, TxnBuffer, TxnItem};
pub use stats::StatsSnapshot;
