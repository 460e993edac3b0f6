/*
SPDX-FileCopyrightText: Copyright 2025 Metronome Project Contributors
SPDX-License-Identifier: MIT
*/

//! One-shot-write, multi-read result cells.
//!
//! Every submission creates one [`TaskHandle`], shared between the submitter
//! (reader) and exactly one worker at a time (writer).  The cell walks a
//! strictly one-way state machine:
//!
//! ```text
//! Pending ──► Completed(Ok(value))
//!         ──► Completed(Err(failure))
//!         ──► Cancelled
//! ```
//!
//! Each arrow is terminal — a cell is never written twice.  For periodic
//! tasks this means the handle is settled by the **first** completed cycle;
//! later cycles run (and reschedule) without touching it.
//!
//! Reads require `T: Clone` so that any number of observers can extract the
//! value; the cell itself needs no synchronisation beyond its single
//! transition (one mutex + condvar pair).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::debug;

use crate::queue::TimerQueue;
use crate::task::{TaskId, TaskKind};

// ── Failure value ─────────────────────────────────────────────────────────────

/// A captured action failure: either the `Err` the action returned or the
/// payload of a panic that was contained inside the worker.
///
/// Cheap to clone (`Arc` inside) so every reader of the handle can observe
/// the same failure.
#[derive(Clone)]
pub struct ActionFailure {
    inner: Arc<anyhow::Error>,
}

impl ActionFailure {
    pub(crate) fn new(err: anyhow::Error) -> Self {
        ActionFailure {
            inner: Arc::new(err),
        }
    }

    /// Convert a payload recovered by `catch_unwind` into a failure.
    ///
    /// Panic payloads are almost always `&str` or `String`; anything else is
    /// reported opaquely.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "action panicked with a non-string payload".to_string()
        };
        ActionFailure {
            inner: Arc::new(anyhow::anyhow!("action panicked: {message}")),
        }
    }

    /// Borrow the underlying error for inspection (e.g. `downcast_ref`).
    pub fn error(&self) -> &anyhow::Error {
        &self.inner
    }
}

impl std::fmt::Display for ActionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.inner.fmt(f)
    }
}

impl std::fmt::Debug for ActionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ActionFailure({:?})", self.inner)
    }
}

// ── Errors observed through a handle ──────────────────────────────────────────

/// Why a read of a [`TaskHandle`] did not produce a value.
#[derive(Debug, Clone, Error)]
pub enum WaitError {
    /// `get_timeout` elapsed before the cell was settled.  The task itself
    /// is unaffected — it will still run (and can still be read later).
    #[error("result not available within the allotted wait")]
    Timeout,

    /// The task was cancelled (by the submitter or by scheduler shutdown)
    /// before it produced a result.
    #[error("task was cancelled before it produced a result")]
    Cancelled,

    /// The action itself failed on the cycle that settled this handle.
    #[error("action failed: {0}")]
    Failed(ActionFailure),
}

/// Coarse, non-blocking view of a handle's state.
///
/// All four submitter-visible states are distinguishable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleStatus {
    Pending,
    CompletedWithValue,
    CompletedWithError,
    Cancelled,
}

// ── Cell internals ────────────────────────────────────────────────────────────

enum CellState<T> {
    Pending,
    /// A worker has claimed this cell's first run and the body is executing.
    /// Externally indistinguishable from `Pending`, but no longer
    /// cancellable — in-flight work is never interrupted mid-body.
    Running,
    Value(T),
    Error(ActionFailure),
    Cancelled,
}

/// Untyped control surface over a result cell.
///
/// The queue drain at shutdown and the worker dispatch loop both need to
/// drive handles without knowing the output type; this trait is the only
/// thing they see.
pub(crate) trait HandleControl: Send + Sync {
    /// `Pending → Cancelled`.  Returns `false` if the cell was already
    /// claimed or terminal (the transition is one-way, so a settled cell
    /// stays settled and a running body completes).
    fn cancel_pending(&self) -> bool;

    /// Claim the cell for an execution about to start: `Pending → Running`.
    ///
    /// Returns `false` only when the cell is `Cancelled` — the worker must
    /// then discard the task unrun.  A cell already settled by an earlier
    /// periodic cycle returns `true`: the cycle still executes, it just has
    /// nothing left to deliver.
    fn begin_run(&self) -> bool;
}

/// Shared state behind a [`TaskHandle`]: one mutex-guarded state slot and one
/// condvar for readers blocked in `get`/`get_timeout`.
pub(crate) struct HandleInner<T> {
    state: Mutex<CellState<T>>,
    settled: Condvar,
}

impl<T: Send> HandleInner<T> {
    pub(crate) fn new() -> Self {
        HandleInner {
            state: Mutex::new(CellState::Pending),
            settled: Condvar::new(),
        }
    }

    /// `Pending → Completed(Ok)`.  Returns `false` if already terminal.
    pub(crate) fn fulfill_value(&self, value: T) -> bool {
        self.transition(CellState::Value(value))
    }

    /// `Pending → Completed(Err)`.  Returns `false` if already terminal.
    pub(crate) fn fulfill_error(&self, failure: ActionFailure) -> bool {
        self.transition(CellState::Error(failure))
    }

    /// Settle the cell from either of its live states.  A worker settles
    /// from `Running`; shutdown settles never-claimed cells from `Pending`.
    fn transition(&self, terminal: CellState<T>) -> bool {
        let mut state = self.state.lock();
        if !matches!(*state, CellState::Pending | CellState::Running) {
            return false;
        }
        *state = terminal;
        drop(state);
        self.settled.notify_all();
        true
    }

    fn status(&self) -> HandleStatus {
        match *self.state.lock() {
            CellState::Pending | CellState::Running => HandleStatus::Pending,
            CellState::Value(_) => HandleStatus::CompletedWithValue,
            CellState::Error(_) => HandleStatus::CompletedWithError,
            CellState::Cancelled => HandleStatus::Cancelled,
        }
    }

    /// The terminal outcome, or `None` while pending.
    fn read_terminal(state: &CellState<T>) -> Option<Result<T, WaitError>>
    where
        T: Clone,
    {
        match state {
            CellState::Pending | CellState::Running => None,
            CellState::Value(v) => Some(Ok(v.clone())),
            CellState::Error(e) => Some(Err(WaitError::Failed(e.clone()))),
            CellState::Cancelled => Some(Err(WaitError::Cancelled)),
        }
    }

    fn wait(&self) -> Result<T, WaitError>
    where
        T: Clone,
    {
        let mut state = self.state.lock();
        loop {
            if let Some(outcome) = Self::read_terminal(&state) {
                return outcome;
            }
            self.settled.wait(&mut state);
        }
    }

    fn wait_deadline(&self, deadline: Instant) -> Result<T, WaitError>
    where
        T: Clone,
    {
        let mut state = self.state.lock();
        loop {
            if let Some(outcome) = Self::read_terminal(&state) {
                return outcome;
            }
            if self.settled.wait_until(&mut state, deadline).timed_out() {
                // Re-check once: the writer may have settled the cell in the
                // window between the timeout and reacquiring the lock.
                return Self::read_terminal(&state).unwrap_or(Err(WaitError::Timeout));
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn peek_value(&self) -> Option<T>
    where
        T: Clone,
    {
        match &*self.state.lock() {
            CellState::Value(v) => Some(v.clone()),
            _ => None,
        }
    }

    #[cfg(test)]
    pub(crate) fn peek_error(&self) -> Option<ActionFailure> {
        match &*self.state.lock() {
            CellState::Error(e) => Some(e.clone()),
            _ => None,
        }
    }
}

impl<T: Send> HandleControl for HandleInner<T> {
    fn cancel_pending(&self) -> bool {
        let mut state = self.state.lock();
        if !matches!(*state, CellState::Pending) {
            return false;
        }
        *state = CellState::Cancelled;
        drop(state);
        self.settled.notify_all();
        true
    }

    fn begin_run(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            CellState::Pending => {
                *state = CellState::Running;
                true
            }
            CellState::Cancelled => false,
            // Settled by an earlier cycle of a periodic task; the new cycle
            // still runs, it just has nothing left to deliver.
            _ => true,
        }
    }
}

// ── TaskHandle ────────────────────────────────────────────────────────────────

/// Caller-facing handle for one submission: eventual value or failure, plus
/// cancellation.
///
/// Cloneable reads require `T: Clone`; the handle itself holds the cell via
/// `Arc`, so it may outlive the scheduler (reads then observe whatever
/// terminal state the task reached — typically `Cancelled` after shutdown).
pub struct TaskHandle<T> {
    id: TaskId,
    kind: TaskKind,
    inner: Arc<HandleInner<T>>,
    /// Shared with the queued record; set here, observed by the workers.
    cancelled: Arc<AtomicBool>,
    /// Weak so a forgotten handle never keeps the queue alive.
    queue: Weak<TimerQueue>,
}

impl<T: Send> TaskHandle<T> {
    pub(crate) fn new(
        id: TaskId,
        kind: TaskKind,
        inner: Arc<HandleInner<T>>,
        cancelled: Arc<AtomicBool>,
        queue: Weak<TimerQueue>,
    ) -> Self {
        TaskHandle {
            id,
            kind,
            inner,
            cancelled,
            queue,
        }
    }

    /// The id assigned to this submission.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// The scheduling kind this handle was created for.
    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Non-blocking state probe.
    pub fn status(&self) -> HandleStatus {
        self.inner.status()
    }

    /// Block until the cell settles, then return the value or the failure.
    pub fn get(&self) -> Result<T, WaitError>
    where
        T: Clone,
    {
        self.inner.wait()
    }

    /// Like [`get`](Self::get) but bounded: returns [`WaitError::Timeout`]
    /// if the cell has not settled within `timeout`.  Elapsing does **not**
    /// cancel the task.
    pub fn get_timeout(&self, timeout: Duration) -> Result<T, WaitError>
    where
        T: Clone,
    {
        self.inner.wait_deadline(Instant::now() + timeout)
    }

    /// Cancel the task.
    ///
    /// * A queued, not-yet-started run is removed from the timer queue and
    ///   never executes; the handle transitions to `Cancelled`.
    /// * A run that has already started is unaffected (in-flight work is
    ///   never interrupted mid-body).
    /// * For periodic tasks, all future reinsertions are suppressed in
    ///   addition to the above.
    ///
    /// Returns `true` iff this call changed the task's fate: it removed a
    /// pending run and/or stopped a periodic task.  Returns `false` when the
    /// task already ran to completion (one-shot), was already cancelled, or
    /// the call raced with an in-flight final execution.
    pub fn cancel(&self) -> bool {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return false; // already cancelled
        }

        let removed = match self.queue.upgrade() {
            Some(queue) => queue.remove(self.id),
            None => false,
        };
        let transitioned = self.inner.cancel_pending();

        debug!(
            task_id = %self.id,
            kind = self.kind.label(),
            removed,
            transitioned,
            "cancel requested"
        );

        match self.kind {
            TaskKind::OneShot => removed || transitioned,
            // A first cancel of a live periodic task always stops future
            // cycles, whether or not the first run already settled the cell.
            // A shut-down queue means the task was already stopped — this
            // call changed nothing.
            _ => {
                removed
                    || transitioned
                    || self.queue.upgrade().is_some_and(|q| !q.is_shut_down())
            }
        }
    }
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
