/*
SPDX-FileCopyrightText: Copyright 2025 Metronome Project Contributors
SPDX-License-Identifier: MIT
*/

//! Core task data structures for the metronome executor.
//!
//! Two layers model the two sides of the submission pipeline:
//!
//! ```text
//! caller ──(Action, typed)──►  ScheduledTask  ──(TimerQueue)──►  worker
//!              ↑ generic over output            ↑ type-erased, owns the runnable
//! ```
//!
//! # Ownership model
//! A [`ScheduledTask`] is **owned** by the [`TimerQueue`](crate::queue::TimerQueue)
//! while it is pending, and exclusively by one worker thread between dequeue
//! and reinsertion (periodic kinds) or discard (one-shot).  The compiler
//! guarantees there is never more than one live copy of a logical task: the
//! record is moved out of the queue, mutated in place (`next_run`), and moved
//! back in.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::handle::{ActionFailure, HandleControl, HandleInner};

// ── Task identity ─────────────────────────────────────────────────────────────

/// Process-unique identifier for a submitted task.
///
/// Allocated from a global monotonic counter at submission time.  The id is
/// stable across periodic reinsertions — every cycle of a fixed-rate or
/// fixed-delay task carries the id it was submitted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Allocate the next unused id.
    pub(crate) fn next() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value, for logging.
    pub fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ── Scheduling kind ───────────────────────────────────────────────────────────

/// How a task is (re)scheduled after it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Executes exactly once, then is removed permanently.
    OneShot,

    /// Reschedules from the *ideal* previous slot: `next_run += period`.
    ///
    /// If an execution overruns its period the next run is already due and
    /// fires immediately on pickup — one immediate re-fire, never a batched
    /// catch-up and never a skipped cycle.
    FixedRate { period: Duration },

    /// Reschedules from the *actual* completion time:
    /// `next_run = completion + period`.  Never catches up.
    FixedDelay { period: Duration },
}

impl TaskKind {
    /// `true` for the two self-rescheduling kinds.
    pub fn is_periodic(self) -> bool {
        !matches!(self, TaskKind::OneShot)
    }

    /// The period, when one exists.
    pub fn period(self) -> Option<Duration> {
        match self {
            TaskKind::OneShot => None,
            TaskKind::FixedRate { period } | TaskKind::FixedDelay { period } => Some(period),
        }
    }

    /// Short lowercase label for log lines and error messages.
    pub fn label(self) -> &'static str {
        match self {
            TaskKind::OneShot => "one-shot",
            TaskKind::FixedRate { .. } => "fixed-rate",
            TaskKind::FixedDelay { .. } => "fixed-delay",
        }
    }
}

// ── Action ────────────────────────────────────────────────────────────────────

/// A unit of user work: one call operation, no input, a value or an error out.
///
/// Implemented for free by any `FnMut() -> anyhow::Result<T>` closure, which
/// is how virtually all callers provide work:
///
/// ```rust,ignore
/// scheduler.schedule_once(|| Ok(compute()), Duration::from_millis(50))?;
/// ```
///
/// `run` takes `&mut self` because periodic tasks invoke the same action once
/// per cycle; an action may therefore carry mutable state across cycles.
pub trait Action: Send {
    /// The value produced on success.
    type Output: Send;

    /// Perform the work.
    fn run(&mut self) -> anyhow::Result<Self::Output>;
}

impl<T, F> Action for F
where
    T: Send,
    F: FnMut() -> anyhow::Result<T> + Send,
{
    type Output = T;

    fn run(&mut self) -> anyhow::Result<T> {
        (self)()
    }
}

// ── ScheduledTask (queued record) ─────────────────────────────────────────────

/// Type-erased record stored in the [`TimerQueue`](crate::queue::TimerQueue).
///
/// The typed [`Action`] and its result cell are captured inside `runnable`;
/// what remains visible to the queue and the workers is only what they need:
/// identity, kind, the next due time, the shared cancellation flag and an
/// untyped control path to the handle (for cancelling without knowing `T`).
pub(crate) struct ScheduledTask {
    pub(crate) id: TaskId,
    pub(crate) kind: TaskKind,
    /// When this task next becomes due.  Non-decreasing across reinsertions.
    pub(crate) next_run: Instant,
    /// Runs the action once and delivers the outcome to the result cell.
    pub(crate) runnable: Box<dyn FnMut() + Send>,
    /// Set by `TaskHandle::cancel`; checked before invocation and before
    /// every periodic reinsertion.
    pub(crate) cancelled: Arc<AtomicBool>,
    /// Untyped path to the handle, so the queue drain and the dispatch loop
    /// can transition it to `Cancelled` without knowing the output type.
    pub(crate) control: Arc<dyn HandleControl>,
}

impl ScheduledTask {
    /// Build a queued record around a typed action and its result cell.
    ///
    /// The erased `runnable` contains the only code that touches the typed
    /// cell: it runs the action, converts `Err` and panics into an
    /// [`ActionFailure`], and performs the one-shot fulfillment.  A failure
    /// on a cycle that can no longer be delivered (the cell is already
    /// terminal — later periodic cycles) is logged instead of lost silently.
    pub(crate) fn new<A>(
        id: TaskId,
        kind: TaskKind,
        next_run: Instant,
        mut action: A,
        cell: Arc<HandleInner<A::Output>>,
        cancelled: Arc<AtomicBool>,
    ) -> Self
    where
        A: Action + 'static,
        A::Output: 'static,
    {
        let control: Arc<dyn HandleControl> = cell.clone();

        let runnable = Box::new(move || {
            let outcome = match catch_unwind(AssertUnwindSafe(|| action.run())) {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(ActionFailure::new(err)),
                Err(payload) => Err(ActionFailure::from_panic(payload)),
            };

            match outcome {
                Ok(value) => {
                    // First completed cycle wins the cell; later cycles of a
                    // periodic task leave it untouched.
                    cell.fulfill_value(value);
                }
                Err(failure) => {
                    if !cell.fulfill_error(failure.clone()) {
                        warn!(
                            task_id = %id,
                            error = %failure,
                            "action failed on a later cycle; handle already settled"
                        );
                    }
                }
            }
        });

        ScheduledTask {
            id,
            kind,
            next_run,
            runnable,
            cancelled,
            control,
        }
    }

    /// `true` once the submitter has cancelled the task.
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// The due time of the cycle after one that just completed, or `None`
    /// for a one-shot task.
    ///
    /// `completed_at` is the instant the action body returned; it only
    /// matters for `FixedDelay`.  For `FixedRate` the next slot is computed
    /// from the *previous scheduled* slot, so an overrun produces an
    /// already-due next run rather than drift.
    pub(crate) fn next_run_after(&self, completed_at: Instant) -> Option<Instant> {
        match self.kind {
            TaskKind::OneShot => None,
            TaskKind::FixedRate { period } => Some(self.next_run + period),
            TaskKind::FixedDelay { period } => Some(completed_at + period),
        }
    }
}

impl std::fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("next_run", &self.next_run)
            .finish_non_exhaustive()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn erased_noop(kind: TaskKind, next_run: Instant) -> ScheduledTask {
        let cell: Arc<HandleInner<()>> = Arc::new(HandleInner::new());
        ScheduledTask::new(
            TaskId::next(),
            kind,
            next_run,
            || anyhow::Ok(()),
            cell,
            Arc::new(AtomicBool::new(false)),
        )
    }

    // ── TaskId ────────────────────────────────────────────────────────────────

    #[test]
    fn task_ids_are_unique_and_increasing() {
        let a = TaskId::next();
        let b = TaskId::next();
        assert!(b.value() > a.value());
    }

    // ── TaskKind ──────────────────────────────────────────────────────────────

    #[test]
    fn one_shot_is_not_periodic_and_has_no_period() {
        assert!(!TaskKind::OneShot.is_periodic());
        assert_eq!(TaskKind::OneShot.period(), None);
    }

    #[test]
    fn periodic_kinds_expose_their_period() {
        let p = Duration::from_millis(50);
        assert_eq!(TaskKind::FixedRate { period: p }.period(), Some(p));
        assert_eq!(TaskKind::FixedDelay { period: p }.period(), Some(p));
        assert!(TaskKind::FixedRate { period: p }.is_periodic());
        assert!(TaskKind::FixedDelay { period: p }.is_periodic());
    }

    // ── Rescheduling arithmetic ───────────────────────────────────────────────

    #[test]
    fn fixed_rate_next_run_ignores_completion_time() {
        let period = Duration::from_millis(100);
        let slot = Instant::now();
        let task = erased_noop(TaskKind::FixedRate { period }, slot);

        // Even a wildly late completion reschedules from the ideal slot.
        let late = slot + Duration::from_secs(5);
        assert_eq!(task.next_run_after(late), Some(slot + period));
    }

    #[test]
    fn fixed_delay_next_run_tracks_completion_time() {
        let period = Duration::from_millis(100);
        let slot = Instant::now();
        let task = erased_noop(TaskKind::FixedDelay { period }, slot);

        let finished = slot + Duration::from_millis(370);
        assert_eq!(task.next_run_after(finished), Some(finished + period));
    }

    #[test]
    fn one_shot_never_reschedules() {
        let slot = Instant::now();
        let task = erased_noop(TaskKind::OneShot, slot);
        assert_eq!(task.next_run_after(slot), None);
    }

    // ── Runnable delivery ─────────────────────────────────────────────────────

    #[test]
    fn runnable_delivers_value_to_cell() {
        let cell: Arc<HandleInner<u32>> = Arc::new(HandleInner::new());
        let mut task = ScheduledTask::new(
            TaskId::next(),
            TaskKind::OneShot,
            Instant::now(),
            || anyhow::Ok(7u32),
            cell.clone(),
            Arc::new(AtomicBool::new(false)),
        );

        (task.runnable)();
        assert_eq!(cell.peek_value(), Some(7));
    }

    #[test]
    fn runnable_converts_panic_into_failure() {
        let cell: Arc<HandleInner<u32>> = Arc::new(HandleInner::new());
        let mut task = ScheduledTask::new(
            TaskId::next(),
            TaskKind::OneShot,
            Instant::now(),
            || -> anyhow::Result<u32> { panic!("boom") },
            cell.clone(),
            Arc::new(AtomicBool::new(false)),
        );

        (task.runnable)();
        assert!(cell.peek_value().is_none());
        let failure = cell.peek_error().expect("panic must surface as failure");
        assert!(failure.to_string().contains("boom"));
    }

    #[test]
    fn second_cycle_does_not_rewrite_cell() {
        let cell: Arc<HandleInner<u32>> = Arc::new(HandleInner::new());
        let mut calls = 0u32;
        let mut task = ScheduledTask::new(
            TaskId::next(),
            TaskKind::FixedRate {
                period: Duration::from_millis(10),
            },
            Instant::now(),
            move || {
                calls += 1;
                anyhow::Ok(calls)
            },
            cell.clone(),
            Arc::new(AtomicBool::new(false)),
        );

        (task.runnable)();
        (task.runnable)();
        // First cycle's value sticks.
        assert_eq!(cell.peek_value(), Some(1));
    }
}
