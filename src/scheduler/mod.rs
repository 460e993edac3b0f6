//! The public submission facade.
//!
//! [`Scheduler`] owns the [`TimerQueue`](crate::queue::TimerQueue) and the
//! worker pool, and exposes the three submission operations plus shutdown:
//!
//! | Operation | Kind | Reschedule rule |
//! |---|---|---|
//! | [`schedule_once`](Scheduler::schedule_once) | one-shot | never |
//! | [`schedule_at_fixed_rate`](Scheduler::schedule_at_fixed_rate) | fixed-rate | ideal previous slot + period |
//! | [`schedule_with_fixed_delay`](Scheduler::schedule_with_fixed_delay) | fixed-delay | actual completion + period |
//!
//! Control flow per submission: validate → build the task record and its
//! result cell → insert into the queue (waking a worker) → hand the typed
//! [`TaskHandle`](crate::handle::TaskHandle) back to the caller.
//!
//! # Example
//! ```rust,ignore
//! let scheduler = Scheduler::new()?;
//! let handle = scheduler.schedule_once(|| Ok(2 + 2), Duration::from_millis(10))?;
//! assert_eq!(handle.get()?, 4);
//! scheduler.shutdown();
//! ```

pub mod error;
mod worker;

pub use error::SubmitError;

use std::io;
use std::num::NonZeroUsize;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::SchedulerConfig;
use crate::handle::{HandleInner, TaskHandle};
use crate::queue::TimerQueue;
use crate::task::{Action, ScheduledTask, TaskId, TaskKind};
use worker::WorkerPool;

// ── Scheduler ─────────────────────────────────────────────────────────────────

/// A concurrent scheduled-task executor.
///
/// Submissions are accepted from any thread (`&self` methods, `Send + Sync`).
/// Dropping the scheduler performs a full [`shutdown`](Self::shutdown), so a
/// scope exit never leaks worker threads.
pub struct Scheduler {
    queue: Arc<TimerQueue>,
    /// Taken (once) by `shutdown`; `None` afterwards makes the call
    /// idempotent.
    pool: Mutex<Option<WorkerPool>>,
    worker_count: NonZeroUsize,
}

impl Scheduler {
    /// Create a scheduler with one worker per unit of host parallelism.
    pub fn new() -> io::Result<Self> {
        Self::with_workers(default_worker_count())
    }

    /// Create a scheduler with an explicit worker count.
    pub fn with_workers(worker_count: NonZeroUsize) -> io::Result<Self> {
        let queue = Arc::new(TimerQueue::new());
        let pool = WorkerPool::spawn(worker_count, &queue)?;
        info!(workers = worker_count.get(), "scheduler started");
        Ok(Scheduler {
            queue,
            pool: Mutex::new(Some(pool)),
            worker_count,
        })
    }

    /// Create a scheduler from a loaded [`SchedulerConfig`].
    pub fn from_config(config: &SchedulerConfig) -> io::Result<Self> {
        Self::with_workers(config.worker_count)
    }

    /// The fixed number of workers this scheduler was built with.
    pub fn worker_count(&self) -> usize {
        self.worker_count.get()
    }

    /// Number of tasks currently queued (excludes in-flight executions).
    pub fn pending_tasks(&self) -> usize {
        self.queue.len()
    }

    // ── Submission operations ─────────────────────────────────────────────────

    /// Run `action` once, `delay` from now.
    pub fn schedule_once<A>(
        &self,
        action: A,
        delay: Duration,
    ) -> Result<TaskHandle<A::Output>, SubmitError>
    where
        A: Action + 'static,
        A::Output: 'static,
    {
        self.submit(action, TaskKind::OneShot, delay)
    }

    /// Run `action` first after `initial_delay`, then at every ideal slot
    /// `initial_delay + k·period` — regardless of how long individual runs
    /// take.  An overrunning cycle makes the next one fire immediately on
    /// pickup; cycles are never skipped.
    pub fn schedule_at_fixed_rate<A>(
        &self,
        action: A,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<TaskHandle<A::Output>, SubmitError>
    where
        A: Action + 'static,
        A::Output: 'static,
    {
        self.submit(action, TaskKind::FixedRate { period }, initial_delay)
    }

    /// Run `action` first after `initial_delay`, then `period` after each
    /// run **completes**.  The gap is measured from real finish time, so a
    /// slow cycle pushes every later one back — fixed-delay never catches
    /// up.
    pub fn schedule_with_fixed_delay<A>(
        &self,
        action: A,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<TaskHandle<A::Output>, SubmitError>
    where
        A: Action + 'static,
        A::Output: 'static,
    {
        self.submit(action, TaskKind::FixedDelay { period }, initial_delay)
    }

    fn submit<A>(
        &self,
        action: A,
        kind: TaskKind,
        initial_delay: Duration,
    ) -> Result<TaskHandle<A::Output>, SubmitError>
    where
        A: Action + 'static,
        A::Output: 'static,
    {
        // ── Validation ────────────────────────────────────────────────────────
        if let Some(period) = kind.period() {
            if period.is_zero() {
                return Err(SubmitError::ZeroPeriod {
                    kind: kind.label(),
                    period,
                });
            }
        }
        if self.queue.is_shut_down() {
            return Err(SubmitError::Stopped);
        }

        // ── Build task + handle ───────────────────────────────────────────────
        let id = TaskId::next();
        let next_run = Instant::now() + initial_delay;
        let cell = Arc::new(HandleInner::new());
        let cancelled = Arc::new(AtomicBool::new(false));

        let task = ScheduledTask::new(id, kind, next_run, action, cell.clone(), cancelled.clone());

        // The shutdown check above is advisory only; the insert itself is
        // the authoritative gate (shutdown may race between the two).
        self.queue.insert(task).map_err(|_| SubmitError::Stopped)?;

        debug!(
            task_id = %id,
            kind = kind.label(),
            delay_ms = initial_delay.as_millis() as u64,
            "submitted"
        );

        Ok(TaskHandle::new(
            id,
            kind,
            cell,
            cancelled,
            Arc::downgrade(&self.queue),
        ))
    }

    // ── Shutdown ──────────────────────────────────────────────────────────────

    /// Stop accepting submissions, discard every queued task (their handles
    /// transition to `Cancelled`), let in-flight executions run to
    /// completion, and join all worker threads.
    ///
    /// Returns only after the last worker has exited.  Idempotent — calling
    /// it again (or dropping the scheduler afterwards) is a no-op, and a
    /// concurrent call blocks until the first one has finished joining.
    pub fn shutdown(&self) {
        // The pool lock is held across the entire drain-and-join sequence:
        // a second caller parks here and cannot return while workers are
        // still finishing in-flight work.
        let mut pool = self.pool.lock();

        // Signal first, then drain: workers blocked in take_next_due wake
        // immediately, and any completion racing this call finds the queue
        // closed when it tries to reinsert.
        let discarded = self.queue.begin_shutdown();
        let discarded_count = discarded.len();
        for task in discarded {
            task.control.cancel_pending();
        }

        match pool.take() {
            Some(pool) => {
                pool.join();
                info!(discarded = discarded_count, "scheduler shut down");
            }
            None => debug!("shutdown called again; nothing to do"),
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Host parallelism, or a single worker when it cannot be determined.
fn default_worker_count() -> NonZeroUsize {
    std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
