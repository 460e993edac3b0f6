/*
SPDX-FileCopyrightText: Copyright 2025 Metronome Project Contributors
SPDX-License-Identifier: MIT
*/

//! Structured error types for the submission surface.
//!
//! Two failure layers exist in this crate:
//!
//! * [`SubmitError`] — raised **synchronously** from the submit call itself:
//!   the arguments were invalid, or the scheduler has already been shut
//!   down.  Nothing was queued.
//! * [`WaitError`](crate::handle::WaitError) — observed **asynchronously**
//!   through a [`TaskHandle`](crate::handle::TaskHandle): the action failed,
//!   the task was cancelled, or a bounded wait elapsed.  An action failure
//!   is always contained to its handle; it never crosses threads as a panic
//!   and never terminates a worker.
//!
//! **Do not** replace these with `anyhow::Error` in library paths — the
//! structured variants are intentional.  `anyhow` belongs to action bodies
//! and the demo binary.

use std::time::Duration;

use thiserror::Error;

// ── Submission errors ─────────────────────────────────────────────────────────

/// Why a submission was rejected before anything was queued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    /// A periodic kind was submitted with a zero period.
    ///
    /// Negative delays and periods are unrepresentable (`Duration` is
    /// unsigned), so a zero period is the only invalid timing argument left
    /// to reject at runtime.
    #[error("a {kind} task requires a period greater than zero (got {period:?})")]
    ZeroPeriod {
        /// Which periodic kind was being submitted ("fixed-rate" or
        /// "fixed-delay").
        kind: &'static str,
        period: Duration,
    },

    /// Submission was attempted after [`shutdown`](crate::Scheduler::shutdown).
    #[error("scheduler has been shut down; no further submissions are accepted")]
    Stopped,
}
