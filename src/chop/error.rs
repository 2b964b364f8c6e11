// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Chopped-transaction error types.

/// Errors surfaced by the chopping coordinator.
///
/// [`Aborted`](ChopError::Aborted) is an expected control-flow outcome:
/// the transaction observed a validation failure or a cascaded abort and
/// unwound cleanly. The caller may start a fresh transaction and retry.
/// The thread-id variants are session-creation failures.
#[derive(Debug, thiserror::Error)]
pub enum ChopError {
    /// The transaction aborted; its state has been fully unwound and the
    /// session may retry with a new `start_txn`.
    #[error("transaction aborted")]
    Aborted,

    /// Thread id outside the configured `0..max_threads` range.
    #[error("thread id {tid} out of range 0..{max}")]
    ThreadIdOutOfRange {
        /// The offending id.
        tid: usize,
        /// The configured exclusive bound.
        max: usize,
    },

    /// Another live session already owns this thread id.
    #[error("thread id {0} is already claimed by a live session")]
    ThreadIdClaimed(usize),
}
