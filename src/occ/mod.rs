// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Optimistic concurrency control: the per-thread transaction engine.
//!
//! User code runs lock-free against shared objects, recording reads and
//! buffering writes in a per-thread item set. Commit sorts the write
//! subset into a canonical order, locks it, re-validates every read,
//! installs writes in insertion order and unlocks: the classic
//! sort/lock/validate/install/unlock pipeline.
//!
//! # Key Concepts
//!
//! ## Items
//!
//! Every `(shared object, key)` a transaction touches becomes a
//! [`TxnItem`] holding an optional read stamp and an optional pending
//! write, both packed into the transaction's [`TxnBuffer`].
//!
//! ## The shared-object contract
//!
//! Data structures participate by implementing the five operations of
//! [`Shared`] (`lock`, `check`, `install`, `unlock`, `cleanup`); the
//! engine assumes nothing else about them.
//!
//! ## Abort as an outcome
//!
//! Validation failure is not an error: [`Transaction::try_commit`] returns
//! `false`, every item has received `cleanup(_, false)`, and the caller
//! decides whether to retry.

mod buffer;
mod item;
mod shared;
mod transaction;

pub use buffer::{Packable, Packed, PackedObject, TxnBuffer};
pub use item::{ItemProxy, TxnItem};
pub use shared::Shared;
pub use transaction::Transaction;

pub(crate) use transaction::CommitFootprint;
