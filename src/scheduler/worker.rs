/*
SPDX-FileCopyrightText: Copyright 2025 Metronome Project Contributors
SPDX-License-Identifier: MIT
*/

//! The worker pool and its dispatch loop.
//!
//! Each worker is one OS thread running [`dispatch_loop`]: it blocks in
//! [`TimerQueue::take_next_due`], runs the task's action **with no lock
//! held**, and post-processes — fulfilling the handle happened inside the
//! runnable; what remains here is the rescheduling decision for periodic
//! kinds and the cancellation checks around it.
//!
//! A worker only ever exits its loop when the queue reports shutdown.  An
//! action failure or panic is contained inside the runnable and completes
//! the cycle like a success as far as scheduling is concerned.

use std::io;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{debug, trace};

use crate::queue::TimerQueue;
use crate::task::ScheduledTask;

// ── WorkerPool ────────────────────────────────────────────────────────────────

/// Fixed set of dispatch threads sharing one [`TimerQueue`].
///
/// The pool never resizes.  Threads are named `metronome-worker-N` so they
/// are recognisable in debuggers and panic backtraces.
pub(crate) struct WorkerPool {
    threads: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` workers against `queue`.
    pub(crate) fn spawn(count: NonZeroUsize, queue: &Arc<TimerQueue>) -> io::Result<Self> {
        let mut threads = Vec::with_capacity(count.get());
        for index in 0..count.get() {
            let queue = Arc::clone(queue);
            let handle = thread::Builder::new()
                .name(format!("metronome-worker-{index}"))
                .spawn(move || dispatch_loop(index, queue))?;
            threads.push(handle);
        }
        debug!(workers = count.get(), "worker pool started");
        Ok(WorkerPool { threads })
    }

    /// Number of workers in the pool.
    pub(crate) fn len(&self) -> usize {
        self.threads.len()
    }

    /// Join every worker thread.  Returns only once all of them have exited,
    /// which (given the queue is shut down) means every in-flight execution
    /// has run to completion.
    pub(crate) fn join(self) {
        for handle in self.threads {
            // A worker never panics out of its loop (actions are contained),
            // but if one somehow did, the join error is not worth crashing
            // the shutdown path over.
            if handle.join().is_err() {
                debug!("worker thread exited abnormally");
            }
        }
    }
}

// ── Dispatch loop ─────────────────────────────────────────────────────────────

/// Idle → take next due → run (unlocked) → post-process → Idle, until the
/// queue signals shutdown.
fn dispatch_loop(worker: usize, queue: Arc<TimerQueue>) {
    debug!(worker, "dispatch loop started");

    while let Some(mut task) = queue.take_next_due() {
        // Cancelled while queued but after becoming due, or between our
        // dequeue and this check: never invoke the action.  `begin_run`
        // claims the cell for this execution; from here on a concurrent
        // cancel can no longer affect the run.
        if task.is_cancelled() || !task.control.begin_run() {
            task.control.cancel_pending();
            trace!(worker, task_id = %task.id, "discarding cancelled task");
            continue;
        }

        trace!(
            worker,
            task_id = %task.id,
            kind = task.kind.label(),
            "executing"
        );

        // No queue lock is held here: one slow action cannot stall the
        // scheduling of others.
        (task.runnable)();
        let completed_at = Instant::now();

        let Some(next_run) = task.next_run_after(completed_at) else {
            continue; // one-shot: removed permanently
        };

        // Cancel that arrived during the run suppresses the reinsertion but
        // never interrupts the body that just finished.
        if task.is_cancelled() {
            task.control.cancel_pending();
            trace!(worker, task_id = %task.id, "periodic task cancelled mid-cycle");
            continue;
        }

        // Reinsert strictly after the invocation, so no worker can ever
        // observe a not-yet-run copy of a task that is still executing.
        task.next_run = next_run;
        if let Err(orphan) = queue.insert(task) {
            // Shutdown raced the completion: the next cycle will never run.
            orphan.control.cancel_pending();
            trace!(worker, task_id = %orphan.id, "reinsertion refused by shutdown");
        }
    }

    debug!(worker, "dispatch loop stopped");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
