//! Time-ordered pending-task set with blocking "take next due" retrieval.
//!
//! [`TimerQueue`] is the single point of coordination between submitters and
//! the worker pool.  Storage is a `BTreeMap` keyed by `(due_instant, seq)`:
//! the map's sorted iteration gives earliest-deadline-first retrieval, and
//! the monotonically increasing `seq` breaks ties between equal deadlines in
//! FIFO submission order — required so two zero-delay submissions on a
//! single worker run in program order.
//!
//! One mutex guards the storage; one condvar carries both "a task was
//! inserted" and "shutdown" wakeups.  [`take_next_due`](TimerQueue::take_next_due)
//! is the only blocking operation: it computes a wait deadline from the
//! earliest pending task and performs an interruptible `wait_until`,
//! re-evaluating the head of the map after **every** wake — an insert may
//! have introduced an earlier deadline than the one it went to sleep on.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::task::{ScheduledTask, TaskId};

// ── Internal state ────────────────────────────────────────────────────────────

/// Ordering key: due time first, then submission sequence for FIFO ties.
type QueueKey = (Instant, u64);

struct QueueState {
    /// Pending tasks in retrieval order.
    pending: BTreeMap<QueueKey, ScheduledTask>,
    /// Side index for O(log n) removal by id (cancellation path).
    by_id: HashMap<TaskId, QueueKey>,
    /// Next tie-break sequence number; strictly increasing per insert, so
    /// reinserted periodic cycles sort after anything already queued for the
    /// same instant.
    next_seq: u64,
    /// Once set, `insert` rejects and `take_next_due` returns `None`.
    shutdown: bool,
}

impl Default for QueueState {
    fn default() -> Self {
        QueueState {
            pending: BTreeMap::new(),
            by_id: HashMap::new(),
            next_seq: 0,
            shutdown: false,
        }
    }
}

// ── TimerQueue ────────────────────────────────────────────────────────────────

/// Concurrent container of pending tasks ordered by next-run time.
///
/// Owned behind an `Arc` shared by the scheduler facade, the worker threads
/// and (weakly) every outstanding [`TaskHandle`](crate::handle::TaskHandle).
pub(crate) struct TimerQueue {
    state: Mutex<QueueState>,
    /// Single wakeup primitive for both inserts and shutdown.
    wakeup: Condvar,
}

impl TimerQueue {
    pub(crate) fn new() -> Self {
        TimerQueue {
            state: Mutex::new(QueueState::default()),
            wakeup: Condvar::new(),
        }
    }

    /// Insert a task, waking a blocked worker — the new task may be due
    /// earlier than whatever deadline that worker went to sleep on.
    ///
    /// Returns the task back as `Err` if the queue has been shut down (the
    /// caller decides what to do with the orphan — the facade maps it to
    /// `SubmitError::Stopped`, the dispatch loop cancels its handle).
    pub(crate) fn insert(&self, task: ScheduledTask) -> Result<(), ScheduledTask> {
        {
            let mut state = self.state.lock();
            if state.shutdown {
                return Err(task);
            }
            let key = (task.next_run, state.next_seq);
            state.next_seq += 1;
            state.by_id.insert(task.id, key);
            trace!(task_id = %task.id, kind = task.kind.label(), "queued");
            state.pending.insert(key, task);
        }
        // One new task can satisfy exactly one worker.
        self.wakeup.notify_one();
        Ok(())
    }

    /// Block until the earliest pending task is due, then remove and return
    /// it.  Returns `None` when the queue has been shut down.
    ///
    /// A worker sleeping here is woken early by any insert (the head may
    /// have changed) and by shutdown; on every wake the head is re-read
    /// rather than trusting the deadline the wait was parameterised with.
    pub(crate) fn take_next_due(&self) -> Option<ScheduledTask> {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return None;
            }

            let Some(&head_key) = state.pending.keys().next() else {
                self.wakeup.wait(&mut state);
                continue;
            };

            let (due, _) = head_key;
            if due <= Instant::now() {
                if let Some((_, task)) = state.pending.pop_first() {
                    state.by_id.remove(&task.id);
                    return Some(task);
                }
                continue;
            }

            // Not due yet: sleep until the head's deadline, or until an
            // insert/shutdown wakes us early.  The loop re-evaluates either
            // way, so a spurious or stale wake is harmless.
            self.wakeup.wait_until(&mut state, due);
        }
    }

    /// Physically remove a pending task by id (cancellation path).
    ///
    /// Returns `false` when the task is not queued — it may be in flight on
    /// a worker, already completed, or never have existed.
    pub(crate) fn remove(&self, id: TaskId) -> bool {
        let mut state = self.state.lock();
        match state.by_id.remove(&id) {
            Some(key) => {
                state.pending.remove(&key);
                debug!(task_id = %id, "removed from queue by cancel");
                true
            }
            None => false,
        }
    }

    /// Flip the shutdown flag, wake every blocked worker, and drain whatever
    /// is still pending.  Idempotent: later calls return an empty drain.
    ///
    /// The drained tasks never execute; the caller transitions their handles
    /// to `Cancelled`.
    pub(crate) fn begin_shutdown(&self) -> Vec<ScheduledTask> {
        let drained = {
            let mut state = self.state.lock();
            state.shutdown = true;
            state.by_id.clear();
            std::mem::take(&mut state.pending)
                .into_values()
                .collect::<Vec<_>>()
        };
        self.wakeup.notify_all();
        if !drained.is_empty() {
            debug!(discarded = drained.len(), "queue drained at shutdown");
        }
        drained
    }

    /// `true` once [`begin_shutdown`](Self::begin_shutdown) has run.
    pub(crate) fn is_shut_down(&self) -> bool {
        self.state.lock().shutdown
    }

    /// Number of currently queued (not in-flight) tasks.
    pub(crate) fn len(&self) -> usize {
        self.state.lock().pending.len()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
