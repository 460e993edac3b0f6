//! End-to-end timing behaviour of the executor.
//!
//! These tests measure real wall-clock behaviour, so every assertion uses a
//! one-sided bound (never-early) or a generous tolerance (eventually-fires)
//! to stay robust on loaded CI machines.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use metronome::{HandleStatus, Scheduler, SubmitError, WaitError};

fn single_worker() -> Scheduler {
    Scheduler::with_workers(NonZeroUsize::new(1).unwrap()).unwrap()
}

// ── Never-early guarantees ────────────────────────────────────────────────────

#[test]
fn one_shot_never_runs_before_its_delay() {
    let scheduler = Scheduler::new().unwrap();

    for delay_ms in [0u64, 20, 60] {
        let delay = Duration::from_millis(delay_ms);
        let submitted = Instant::now();
        let handle = scheduler
            .schedule_once(move || anyhow::Ok(Instant::now()), delay)
            .unwrap();

        let ran_at = handle.get().unwrap();
        assert!(
            ran_at >= submitted + delay,
            "task with delay {delay_ms}ms ran {}µs early",
            (submitted + delay - ran_at).as_micros()
        );
    }

    scheduler.shutdown();
}

// ── Scenario A: FIFO tie-break on equal deadlines ─────────────────────────────

#[test]
fn equal_deadline_one_shots_run_in_submission_order() {
    let scheduler = single_worker();
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let a = {
        let order = order.clone();
        scheduler
            .schedule_once(
                move || {
                    order.lock().push("A");
                    anyhow::Ok(())
                },
                Duration::ZERO,
            )
            .unwrap()
    };
    let b = {
        let order = order.clone();
        scheduler
            .schedule_once(
                move || {
                    order.lock().push("B");
                    anyhow::Ok(())
                },
                Duration::ZERO,
            )
            .unwrap()
    };

    a.get().unwrap();
    b.get().unwrap();
    assert_eq!(*order.lock(), vec!["A", "B"]);
    scheduler.shutdown();
}

// ── Scenario B: fixed-rate cadence from the ideal schedule ────────────────────

#[test]
fn fixed_rate_runs_on_the_ideal_grid() {
    let scheduler = single_worker();
    let submitted = Instant::now();
    let stamps: Arc<Mutex<Vec<Duration>>> = Arc::new(Mutex::new(Vec::new()));

    let handle = {
        let stamps = stamps.clone();
        scheduler
            .schedule_at_fixed_rate(
                move || {
                    stamps.lock().push(submitted.elapsed());
                    anyhow::Ok(())
                },
                Duration::from_millis(100),
                Duration::from_millis(50),
            )
            .unwrap()
    };

    // Observe three executions, then stop.
    while stamps.lock().len() < 3 {
        std::thread::sleep(Duration::from_millis(5));
    }
    handle.cancel();

    let observed = stamps.lock().clone();
    for (k, stamp) in observed.iter().take(3).enumerate() {
        let ideal = Duration::from_millis(100 + 50 * k as u64);
        assert!(
            *stamp >= ideal,
            "run {k} fired {}µs before its slot",
            (ideal - *stamp).as_micros()
        );
        assert!(
            *stamp <= ideal + Duration::from_millis(40),
            "run {k} fired {}ms after its slot",
            (*stamp - ideal).as_millis()
        );
    }

    scheduler.shutdown();
}

#[test]
fn fixed_rate_overrun_fires_immediately_not_skipped() {
    let scheduler = single_worker();
    let stamps: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));

    let handle = {
        let stamps = stamps.clone();
        scheduler
            .schedule_at_fixed_rate(
                move || {
                    let first = stamps.lock().is_empty();
                    stamps.lock().push(Instant::now());
                    if first {
                        // Overrun the 30ms period on the first cycle only.
                        std::thread::sleep(Duration::from_millis(90));
                    }
                    anyhow::Ok(())
                },
                Duration::ZERO,
                Duration::from_millis(30),
            )
            .unwrap()
    };

    while stamps.lock().len() < 2 {
        std::thread::sleep(Duration::from_millis(5));
    }
    handle.cancel();

    let observed = stamps.lock().clone();
    // First cycle finished ~90ms in, so the second slot (t+30ms) was already
    // due: it must fire promptly after the overrun, not wait for a new slot.
    let gap = observed[1].duration_since(observed[0]);
    assert!(
        gap >= Duration::from_millis(90),
        "second run started before the overrunning first finished"
    );
    assert!(
        gap <= Duration::from_millis(140),
        "overrun cycle was skipped instead of firing immediately (gap {}ms)",
        gap.as_millis()
    );

    scheduler.shutdown();
}

// ── Fixed-delay: gap measured from completion ─────────────────────────────────

#[test]
fn fixed_delay_measures_from_completion_never_catches_up() {
    let scheduler = single_worker();
    let period = Duration::from_millis(40);
    let body = Duration::from_millis(60);
    // (start, end) per cycle
    let spans: Arc<Mutex<Vec<(Instant, Instant)>>> = Arc::new(Mutex::new(Vec::new()));

    let handle = {
        let spans = spans.clone();
        scheduler
            .schedule_with_fixed_delay(
                move || {
                    let start = Instant::now();
                    std::thread::sleep(body);
                    spans.lock().push((start, Instant::now()));
                    anyhow::Ok(())
                },
                Duration::ZERO,
                period,
            )
            .unwrap()
    };

    while spans.lock().len() < 3 {
        std::thread::sleep(Duration::from_millis(5));
    }
    handle.cancel();

    let observed = spans.lock().clone();
    for window in observed.windows(2) {
        let (_, prev_end) = window[0];
        let (next_start, _) = window[1];
        assert!(
            next_start >= prev_end + period,
            "fixed-delay run started {}µs too soon after the previous completion",
            (prev_end + period - next_start).as_micros()
        );
    }

    scheduler.shutdown();
}

// ── Scenario C: cancellation ──────────────────────────────────────────────────

#[test]
fn cancel_before_due_prevents_execution() {
    let scheduler = single_worker();
    let ran = Arc::new(AtomicBool::new(false));

    let handle = {
        let ran = ran.clone();
        scheduler
            .schedule_once(
                move || {
                    ran.store(true, Ordering::SeqCst);
                    anyhow::Ok(())
                },
                Duration::from_millis(150),
            )
            .unwrap()
    };

    assert!(handle.cancel());
    assert_eq!(handle.status(), HandleStatus::Cancelled);
    assert!(matches!(handle.get(), Err(WaitError::Cancelled)));

    // Wait past the original deadline: the action must never fire.
    std::thread::sleep(Duration::from_millis(250));
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(scheduler.pending_tasks(), 0);

    scheduler.shutdown();
}

#[test]
fn cancel_after_execution_started_does_not_affect_that_run() {
    let scheduler = single_worker();
    let finished = Arc::new(AtomicBool::new(false));

    let handle = {
        let finished = finished.clone();
        scheduler
            .schedule_once(
                move || {
                    std::thread::sleep(Duration::from_millis(120));
                    finished.store(true, Ordering::SeqCst);
                    anyhow::Ok(7)
                },
                Duration::ZERO,
            )
            .unwrap()
    };

    // Give the worker time to start the body, then cancel mid-run.
    std::thread::sleep(Duration::from_millis(40));
    assert!(!handle.cancel(), "cancel must report no effect on a started run");

    assert_eq!(handle.get().unwrap(), 7);
    assert!(finished.load(Ordering::SeqCst));
    scheduler.shutdown();
}

#[test]
fn cancelling_a_periodic_task_stops_future_cycles() {
    let scheduler = single_worker();
    let runs = Arc::new(AtomicU32::new(0));

    let handle = {
        let runs = runs.clone();
        scheduler
            .schedule_at_fixed_rate(
                move || anyhow::Ok(runs.fetch_add(1, Ordering::SeqCst)),
                Duration::ZERO,
                Duration::from_millis(20),
            )
            .unwrap()
    };

    // Let a few cycles run, then cancel.
    while runs.load(Ordering::SeqCst) < 2 {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(handle.cancel());
    let at_cancel = runs.load(Ordering::SeqCst);

    // At most one already-dequeued cycle may still complete; after that the
    // count must freeze.
    std::thread::sleep(Duration::from_millis(120));
    let after = runs.load(Ordering::SeqCst);
    assert!(
        after <= at_cancel + 1,
        "periodic task kept running after cancel ({at_cancel} → {after})"
    );

    scheduler.shutdown();
}

// ── Timeout reads ─────────────────────────────────────────────────────────────

#[test]
fn get_timeout_does_not_cancel_the_task() {
    let scheduler = single_worker();
    let handle = scheduler
        .schedule_once(|| anyhow::Ok(21), Duration::from_millis(120))
        .unwrap();

    assert!(matches!(
        handle.get_timeout(Duration::from_millis(20)),
        Err(WaitError::Timeout)
    ));

    // The task is unaffected and still completes.
    assert_eq!(handle.get().unwrap(), 21);
    scheduler.shutdown();
}

// ── Scenario D: shutdown ──────────────────────────────────────────────────────

#[test]
fn shutdown_waits_for_in_flight_work_and_discards_the_rest() {
    let scheduler = Scheduler::with_workers(NonZeroUsize::new(2).unwrap()).unwrap();
    let finished = Arc::new(AtomicBool::new(false));

    // In-flight by the time shutdown is called.
    let in_flight = {
        let finished = finished.clone();
        scheduler
            .schedule_once(
                move || {
                    std::thread::sleep(Duration::from_millis(100));
                    finished.store(true, Ordering::SeqCst);
                    anyhow::Ok(())
                },
                Duration::ZERO,
            )
            .unwrap()
    };

    // Queued far in the future: must be discarded, never executed.
    let not_due = scheduler
        .schedule_once(|| anyhow::Ok(()), Duration::from_secs(300))
        .unwrap();

    std::thread::sleep(Duration::from_millis(30));
    scheduler.shutdown();

    // shutdown returned ⇒ all workers joined ⇒ the in-flight body completed.
    assert!(finished.load(Ordering::SeqCst), "in-flight run was aborted");
    assert!(in_flight.get().is_ok());
    assert_eq!(not_due.status(), HandleStatus::Cancelled);

    // Idempotent, and submissions are now refused.
    scheduler.shutdown();
    assert!(matches!(
        scheduler.schedule_once(|| anyhow::Ok(()), Duration::ZERO),
        Err(SubmitError::Stopped)
    ));
}
